//! Personalized-to-generic news fallback.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_ARTICLES;
use crate::core::{Article, Subscriber};
use crate::providers::NewsSource;

/// Picks the articles for one subscriber.
///
/// The personalized fetch is tried first. An empty or failed result falls
/// back to general market news. The chosen list is truncated to
/// `max_articles`; the two sources are never mixed and a short list is
/// never padded.
#[derive(Clone)]
pub struct FallbackResolver {
    news: Arc<dyn NewsSource>,
    max_articles: usize,
}

impl FallbackResolver {
    /// Creates a resolver with the default article cap.
    #[must_use]
    pub fn new(news: Arc<dyn NewsSource>) -> Self {
        Self {
            news,
            max_articles: DEFAULT_MAX_ARTICLES,
        }
    }

    /// Sets the article cap.
    #[must_use]
    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = max_articles;
        self
    }

    /// Returns the article cap.
    #[must_use]
    pub fn max_articles(&self) -> usize {
        self.max_articles
    }

    /// Resolves the articles for `subscriber`. Never fails.
    pub async fn resolve_news(&self, subscriber: &Subscriber) -> Vec<Article> {
        if !subscriber.symbols.is_empty() {
            match self.news.news(Some(&subscriber.symbols)).await {
                Ok(articles) if !articles.is_empty() => return self.truncate(articles),
                Ok(_) => debug!(subscriber = %subscriber.email, "No personalized news"),
                Err(err) => warn!(
                    subscriber = %subscriber.email,
                    error = %format!("{err:#}"),
                    "Personalized news fetch failed"
                ),
            }
        }

        match self.news.news(None).await {
            Ok(articles) => self.truncate(articles),
            Err(err) => {
                warn!(
                    subscriber = %subscriber.email,
                    error = %format!("{err:#}"),
                    "General news fetch failed"
                );
                Vec::new()
            }
        }
    }

    fn truncate(&self, mut articles: Vec<Article>) -> Vec<Article> {
        articles.truncate(self.max_articles);
        articles
    }
}

impl std::fmt::Debug for FallbackResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackResolver")
            .field("max_articles", &self.max_articles)
            .finish_non_exhaustive()
    }
}
