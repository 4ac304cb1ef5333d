//! Durable step execution.
//!
//! This module provides:
//! - The step journal and its in-memory and file-backed backends
//! - The bounded retry policy applied to every step
//! - The [`StepExecutor`] that records and replays step results

mod executor;
#[cfg(test)]
mod executor_tests;
mod journal;
mod retry;

pub use executor::StepExecutor;
pub use journal::{FileStepJournal, InMemoryStepJournal, StepJournal, StepRecord, StepState};
pub use retry::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision,
};

/// Step that enumerates digest subscribers.
pub const GET_ALL_USERS: &str = "get-all-users";
/// Per-subscriber news fetch stage.
pub const FETCH_USER_NEWS: &str = "fetch-user-news";
/// Per-subscriber summarize stage.
pub const SUMMARIZE_NEWS: &str = "summarize-news";
/// Step that sends every digest email.
pub const SEND_NEWS_EMAILS: &str = "send-news-emails";
/// Onboarding step that generates the welcome intro.
pub const CALL_GEMINI_API: &str = "call-gemini-api";
/// Onboarding step that sends the welcome email.
pub const SEND_WELCOME_EMAIL: &str = "send-welcome-email";

/// Builds the step name for one item of a per-item stage.
///
/// ```
/// use digestflow::steps::per_item;
///
/// assert_eq!(
///     per_item("summarize-news", "ann@example.com"),
///     "summarize-news-ann@example.com"
/// );
/// ```
#[must_use]
pub fn per_item(stage: &str, item_key: &str) -> String {
    format!("{stage}-{item_key}")
}
