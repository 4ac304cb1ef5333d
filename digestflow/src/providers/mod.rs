//! External collaborators of the workflow.
//!
//! The engine only depends on the traits in this module. Subscriber
//! storage, news queries, the generative-text service, and email delivery
//! are injected at workflow construction.

#[cfg(feature = "gemini")]
pub mod gemini;
pub mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Article, Subscriber};
use crate::errors::ProviderError;

/// Source of subscribers and their watchlists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberSource: Send + Sync {
    /// Returns every subscriber that should receive the daily digest.
    async fn all_users_for_news_email(&self) -> anyhow::Result<Vec<Subscriber>>;

    /// Returns the tracked symbols for a subscriber, in watchlist order.
    async fn watchlist_symbols_by_email(&self, email: &str) -> anyhow::Result<Vec<String>>;
}

/// Source of market news articles.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetches articles for the given symbols, or general market news when
    /// `symbols` is `None`.
    async fn news(&self, symbols: Option<&[String]>) -> anyhow::Result<Vec<Article>>;
}

/// Generative-text service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Sends a prompt and decodes the response.
    ///
    /// A rejected request is a successful call returning
    /// [`ProviderResponse::HttpError`]; `Err` is reserved for transport
    /// and decode failures.
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError>;

    /// Returns false when no credential is configured, so every call would
    /// fail with [`ProviderError::MissingApiKey`].
    fn credentials_present(&self) -> bool {
        true
    }
}

/// Email delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the onboarding email.
    async fn send_welcome_email(&self, email: &WelcomeEmail) -> anyhow::Result<()>;

    /// Sends one subscriber's daily digest.
    async fn send_news_summary_email(&self, email: &NewsSummaryEmail) -> anyhow::Result<()>;
}

/// Decoded generative-text response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderResponse {
    /// The first candidate's text.
    Ok(String),
    /// A 2xx response without any candidate text.
    Empty,
    /// A non-2xx response.
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
}

impl ProviderResponse {
    /// Returns the text if the response carried one.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Ok(text) => Some(text),
            Self::Empty | Self::HttpError { .. } => None,
        }
    }

    /// Converts into a summary; anything but [`ProviderResponse::Ok`] is `None`.
    #[must_use]
    pub fn into_summary(self) -> Option<String> {
        match self {
            Self::Ok(text) => Some(text),
            Self::Empty | Self::HttpError { .. } => None,
        }
    }

    /// Describes a non-text response for failure records.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Ok(_) => None,
            Self::Empty => Some("provider returned no text".to_string()),
            Self::HttpError { status, body } => {
                Some(format!("provider returned HTTP {status}: {}", truncate(body, 200)))
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Payload for the onboarding email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeEmail {
    /// Recipient address.
    pub email: String,
    /// Recipient display name.
    pub name: String,
    /// Generated (or fallback) introduction paragraph.
    pub intro: String,
}

/// Payload for one daily digest email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsSummaryEmail {
    /// Recipient address.
    pub email: String,
    /// Human-readable date line, e.g. "Friday, October 16, 2026".
    pub date: String,
    /// Generated summary body.
    pub news_content: String,
}
