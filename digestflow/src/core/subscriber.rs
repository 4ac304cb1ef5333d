//! Subscriber and work item types.

use serde::{Deserialize, Serialize};

/// A news article as returned by the news source.
///
/// Articles are opaque to the engine; they are passed through unchanged to
/// the prompt-building step.
pub type Article = serde_json::Value;

/// A recipient of the daily digest.
///
/// Sourced externally and immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Unique email address.
    pub email: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tracked ticker symbols, in watchlist order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
}

impl Subscriber {
    /// Creates a subscriber with no name and an empty watchlist.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            symbols: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the tracked symbols.
    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Name used when addressing the subscriber, falling back to the email.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// A subscriber paired with the payload derived for it by a previous stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem<P> {
    /// The subscriber this payload belongs to.
    pub subscriber: Subscriber,
    /// The stage payload (articles, summary, ...).
    pub payload: P,
}

impl<P> WorkItem<P> {
    /// Creates a new work item.
    #[must_use]
    pub fn new(subscriber: Subscriber, payload: P) -> Self {
        Self {
            subscriber,
            payload,
        }
    }
}
