//! In-memory collaborators.

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::{Article, Subscriber};
use crate::errors::ProviderError;
use crate::providers::{
    Mailer, NewsSource, NewsSummaryEmail, ProviderResponse, SubscriberSource, TextGenerator,
    WelcomeEmail,
};

/// Builds a minimal article record with the given headline.
#[must_use]
pub fn article(headline: &str) -> Article {
    serde_json::json!({
        "headline": headline,
        "summary": format!("Details about {headline}"),
        "source": "Test Wire",
        "url": format!("https://news.example.com/{}", headline.to_lowercase().replace(' ', "-")),
    })
}

/// A fixed subscriber list with per-email watchlists.
#[derive(Debug, Clone, Default)]
pub struct StaticSubscriberSource {
    subscribers: Vec<Subscriber>,
    watchlists: HashMap<String, Vec<String>>,
    failing_watchlists: HashSet<String>,
    fail_enumeration: bool,
    enumeration_calls: Arc<AtomicUsize>,
    watchlist_calls: Arc<AtomicUsize>,
}

impl StaticSubscriberSource {
    /// Creates a source returning `subscribers`.
    #[must_use]
    pub fn new(subscribers: Vec<Subscriber>) -> Self {
        Self {
            subscribers,
            ..Self::default()
        }
    }

    /// Sets the watchlist for one subscriber.
    #[must_use]
    pub fn with_watchlist(mut self, email: &str, symbols: &[&str]) -> Self {
        self.watchlists.insert(
            email.to_string(),
            symbols.iter().map(|s| (*s).to_string()).collect(),
        );
        self
    }

    /// Makes the watchlist lookup fail for one subscriber.
    #[must_use]
    pub fn failing_watchlist(mut self, email: &str) -> Self {
        self.failing_watchlists.insert(email.to_string());
        self
    }

    /// Makes subscriber enumeration fail.
    #[must_use]
    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    /// Number of enumeration calls.
    #[must_use]
    pub fn enumeration_calls(&self) -> usize {
        self.enumeration_calls.load(Ordering::SeqCst)
    }

    /// Number of watchlist lookups.
    #[must_use]
    pub fn watchlist_calls(&self) -> usize {
        self.watchlist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriberSource for StaticSubscriberSource {
    async fn all_users_for_news_email(&self) -> anyhow::Result<Vec<Subscriber>> {
        self.enumeration_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumeration {
            bail!("user store unavailable");
        }
        Ok(self.subscribers.clone())
    }

    async fn watchlist_symbols_by_email(&self, email: &str) -> anyhow::Result<Vec<String>> {
        self.watchlist_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_watchlists.contains(email) {
            bail!("watchlist lookup failed for {email}");
        }
        Ok(self.watchlists.get(email).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct NewsState {
    by_symbol: HashMap<String, Vec<Article>>,
    general: Vec<Article>,
    fail_personalized: bool,
    fail_general: bool,
    calls: Vec<Option<Vec<String>>>,
}

/// A news source with canned articles per symbol.
///
/// A personalized fetch returns the articles of every requested symbol, in
/// request order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedNewsSource {
    state: Arc<Mutex<NewsState>>,
}

impl ScriptedNewsSource {
    /// Creates a source with no articles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the articles for one symbol.
    #[must_use]
    pub fn with_symbol_news(self, symbol: &str, articles: Vec<Article>) -> Self {
        self.state
            .lock()
            .by_symbol
            .insert(symbol.to_string(), articles);
        self
    }

    /// Sets the general market news.
    #[must_use]
    pub fn with_general_news(self, articles: Vec<Article>) -> Self {
        self.state.lock().general = articles;
        self
    }

    /// Makes every personalized fetch fail.
    #[must_use]
    pub fn failing_personalized(self) -> Self {
        self.state.lock().fail_personalized = true;
        self
    }

    /// Makes the general fetch fail.
    #[must_use]
    pub fn failing_general(self) -> Self {
        self.state.lock().fail_general = true;
        self
    }

    /// Every call made, as the requested symbols (`None` for general news).
    #[must_use]
    pub fn calls(&self) -> Vec<Option<Vec<String>>> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl NewsSource for ScriptedNewsSource {
    async fn news(&self, symbols: Option<&[String]>) -> anyhow::Result<Vec<Article>> {
        let mut state = self.state.lock();
        state.calls.push(symbols.map(<[String]>::to_vec));
        match symbols {
            Some(_) if state.fail_personalized => Err(anyhow!("news provider returned 502")),
            Some(symbols) => Ok(symbols
                .iter()
                .filter_map(|symbol| state.by_symbol.get(symbol))
                .flatten()
                .cloned()
                .collect()),
            None if state.fail_general => Err(anyhow!("news provider returned 503")),
            None => Ok(state.general.clone()),
        }
    }
}

/// A mailer that records every email instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    welcome: Arc<Mutex<Vec<WelcomeEmail>>>,
    news: Arc<Mutex<Vec<NewsSummaryEmail>>>,
    attempts: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingMailer {
    /// Creates a mailer that accepts every email.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sends to `email` fail.
    #[must_use]
    pub fn failing_for(self, email: &str) -> Self {
        self.failing.lock().insert(email.to_string());
        self
    }

    /// Welcome emails accepted so far.
    #[must_use]
    pub fn welcome_emails(&self) -> Vec<WelcomeEmail> {
        self.welcome.lock().clone()
    }

    /// Digest emails accepted so far.
    #[must_use]
    pub fn news_emails(&self) -> Vec<NewsSummaryEmail> {
        self.news.lock().clone()
    }

    /// Recipients of accepted digest emails, sorted.
    #[must_use]
    pub fn news_recipients(&self) -> Vec<String> {
        let mut recipients: Vec<_> = self.news.lock().iter().map(|e| e.email.clone()).collect();
        recipients.sort();
        recipients
    }

    /// Send attempts of either kind, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check(&self, email: &str) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(email) {
            bail!("SMTP rejected recipient {email}");
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome_email(&self, email: &WelcomeEmail) -> anyhow::Result<()> {
        self.check(&email.email)?;
        self.welcome.lock().push(email.clone());
        Ok(())
    }

    async fn send_news_summary_email(&self, email: &NewsSummaryEmail) -> anyhow::Result<()> {
        self.check(&email.email)?;
        self.news.lock().push(email.clone());
        Ok(())
    }
}

/// A canned reply of [`ScriptedTextGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Return this response.
    Respond(ProviderResponse),
    /// Fail with a transport error carrying this message.
    Fail(String),
}

/// A text generator that answers by matching substrings of the prompt.
///
/// Rules are checked in insertion order; the first needle found in the
/// prompt wins, otherwise the default reply is used.
#[derive(Debug, Clone)]
pub struct ScriptedTextGenerator {
    rules: Vec<(String, ScriptedReply)>,
    default: ScriptedReply,
    credentials: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Default for ScriptedTextGenerator {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default: ScriptedReply::Respond(ProviderResponse::Ok(
                "<p>Markets were mixed today.</p>".to_string(),
            )),
            credentials: true,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ScriptedTextGenerator {
    /// Creates a generator that answers every prompt with a short summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for prompts containing `needle`.
    #[must_use]
    pub fn with_rule(mut self, needle: &str, reply: ScriptedReply) -> Self {
        self.rules.push((needle.to_string(), reply));
        self
    }

    /// Sets the reply for prompts matching no rule.
    #[must_use]
    pub fn with_default(mut self, reply: ScriptedReply) -> Self {
        self.default = reply;
        self
    }

    /// Behaves like a client with no API key configured.
    #[must_use]
    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        if !self.credentials {
            return Err(ProviderError::MissingApiKey);
        }
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map_or(&self.default, |(_, reply)| reply);
        match reply {
            ScriptedReply::Respond(response) => Ok(response.clone()),
            ScriptedReply::Fail(message) => Err(ProviderError::Transport(message.clone())),
        }
    }

    fn credentials_present(&self) -> bool {
        self.credentials
    }
}
