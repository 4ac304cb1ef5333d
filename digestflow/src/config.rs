//! Workflow configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::errors::DigestflowError;
use crate::steps::RetryConfig;

/// Environment variable holding the generative-text API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Environment variable overriding the model name.
pub const MODEL_ENV: &str = "DIGESTFLOW_MODEL";
/// Environment variable overriding the per-subscriber article cap.
pub const MAX_ARTICLES_ENV: &str = "DIGESTFLOW_MAX_ARTICLES";
/// Environment variable overriding the fan-out concurrency bound.
pub const MAX_CONCURRENCY_ENV: &str = "DIGESTFLOW_MAX_CONCURRENCY";

/// Default generative model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";
/// Default cap on articles per subscriber.
pub const DEFAULT_MAX_ARTICLES: usize = 6;
/// Default onboarding intro used when generation fails.
pub const DEFAULT_WELCOME_FALLBACK_INTRO: &str =
    "Thanks for joining Signalist. You now have the tools to track markets and make smarter moves.";

/// Configuration for the digest and onboarding workflows.
#[derive(Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Generative-text API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Generative model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Generative API base URL.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Generative API version path segment.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Articles kept per subscriber after fallback selection.
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    /// Per-stage bound on concurrently running subscriber tasks.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Run-level timeout; `None` disables it.
    #[serde(default)]
    pub run_timeout_seconds: Option<f64>,
    /// Retry policy applied to every durable step.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Intro used by the welcome email when generation fails.
    #[serde(default = "default_welcome_fallback_intro")]
    pub welcome_fallback_intro: String,
    /// Timeout for a single generative-text request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// Keep the step journal after the run reaches a terminal state.
    #[serde(default)]
    pub retain_journal: bool,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_max_articles() -> usize {
    DEFAULT_MAX_ARTICLES
}

fn default_max_concurrency() -> usize {
    8
}

fn default_welcome_fallback_intro() -> String {
    DEFAULT_WELCOME_FALLBACK_INTRO.to_string()
}

fn default_request_timeout() -> f64 {
    30.0
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            api_base_url: default_api_base_url(),
            api_version: default_api_version(),
            max_articles: default_max_articles(),
            max_concurrency: default_max_concurrency(),
            run_timeout_seconds: None,
            retry: RetryConfig::default(),
            welcome_fallback_intro: default_welcome_fallback_intro(),
            request_timeout_seconds: default_request_timeout(),
            retain_journal: false,
        }
    }
}

impl WorkflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `.env` (if present) and reads overrides from the environment.
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> Result<Self, DigestflowError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DigestflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            api_key: lookup(API_KEY_ENV).filter(|key| !key.trim().is_empty()),
            ..Self::default()
        };
        if let Some(model) = lookup(MODEL_ENV) {
            config.model = model;
        }
        if let Some(raw) = lookup(MAX_ARTICLES_ENV) {
            config.max_articles = parse_usize(MAX_ARTICLES_ENV, &raw)?;
        }
        if let Some(raw) = lookup(MAX_CONCURRENCY_ENV) {
            config.max_concurrency = parse_usize(MAX_CONCURRENCY_ENV, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets the article cap.
    #[must_use]
    pub fn with_max_articles(mut self, max_articles: usize) -> Self {
        self.max_articles = max_articles;
        self
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the run timeout.
    #[must_use]
    pub fn with_run_timeout(mut self, seconds: f64) -> Self {
        self.run_timeout_seconds = Some(seconds);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the welcome fallback intro.
    #[must_use]
    pub fn with_welcome_fallback_intro(mut self, intro: impl Into<String>) -> Self {
        self.welcome_fallback_intro = intro.into();
        self
    }

    /// Keeps the journal after the run finishes.
    #[must_use]
    pub fn with_retain_journal(mut self, retain: bool) -> Self {
        self.retain_journal = retain;
        self
    }

    /// Returns true if an API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    /// Gets the run timeout as a Duration.
    #[must_use]
    ///
    /// A value that is not a representable duration is treated as unset.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_seconds
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
    }

    /// Gets the request timeout as a Duration.
    #[must_use]
    ///
    /// Falls back to the default when the value is not a representable duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_request_timeout()))
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// A missing API key is not an error here; it fails the summarize
    /// stage with [`DigestflowError::MissingCredential`].
    pub fn validate(&self) -> Result<(), DigestflowError> {
        if self.max_articles == 0 {
            return Err(DigestflowError::Config("max_articles must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(DigestflowError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DigestflowError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(DigestflowError::Config("model must not be empty".into()));
        }
        if let Some(timeout) = self.run_timeout_seconds {
            check_timeout("run_timeout_seconds", timeout)?;
        }
        check_timeout("request_timeout_seconds", self.request_timeout_seconds)
    }
}

/// A timeout must be positive and fit in a [`Duration`].
fn check_timeout(key: &str, seconds: f64) -> Result<(), DigestflowError> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(()),
        _ => Err(DigestflowError::Config(format!(
            "{key} must be a positive number of seconds, got {seconds}"
        ))),
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize, DigestflowError> {
    raw.trim()
        .parse()
        .map_err(|_| DigestflowError::Config(format!("{key} must be a positive integer, got '{raw}'")))
}

impl std::fmt::Debug for WorkflowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("api_version", &self.api_version)
            .field("max_articles", &self.max_articles)
            .field("max_concurrency", &self.max_concurrency)
            .field("run_timeout_seconds", &self.run_timeout_seconds)
            .field("retry", &self.retry)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("retain_journal", &self.retain_journal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.model, "gemini-2.5-flash-lite");
        assert_eq!(config.max_articles, 6);
        assert!(!config.has_api_key());
        assert!(config.run_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserializes_with_field_defaults() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"api_key": "k", "max_concurrency": 2}"#).unwrap();
        assert!(config.has_api_key());
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.api_version, "v1");
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = WorkflowConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "abc"),
            ("DIGESTFLOW_MODEL", "gemini-pro"),
            ("DIGESTFLOW_MAX_ARTICLES", "3"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.model, "gemini-pro");
        assert_eq!(config.max_articles, 3);
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let config = WorkflowConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = WorkflowConfig::from_lookup(lookup(&[("DIGESTFLOW_MAX_ARTICLES", "six")]))
            .unwrap_err();
        assert!(matches!(err, DigestflowError::Config(_)));

        let err = WorkflowConfig::new().with_max_concurrency(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));

        assert!(WorkflowConfig::new().with_run_timeout(-1.0).validate().is_err());
    }

    #[test]
    fn test_oversized_timeouts_rejected() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"run_timeout_seconds": 1e20}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("run_timeout_seconds"));
        assert!(config.run_timeout().is_none());

        let config: WorkflowConfig =
            serde_json::from_str(r#"{"request_timeout_seconds": 1e20}"#).unwrap();
        assert!(config.validate().is_err());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));

        assert!(WorkflowConfig::new().with_run_timeout(f64::NAN).validate().is_err());
        assert!(WorkflowConfig::new().with_run_timeout(0.0).validate().is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", WorkflowConfig::new().with_api_key("top-secret"));
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
