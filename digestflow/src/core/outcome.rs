//! Per-item outcome type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason recorded for items that were still running when a run was cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// Details of a failed per-subscriber operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Email of the subscriber the operation ran for.
    pub subscriber: String,
    /// Stage the operation belonged to.
    pub stage: String,
    /// Error message.
    pub message: String,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(
        subscriber: impl Into<String>,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            subscriber: subscriber.into(),
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates the error info for an item interrupted by cancellation.
    #[must_use]
    pub fn cancelled(subscriber: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::new(subscriber, stage, CANCELLED_REASON)
    }

    /// Returns true if the item was interrupted by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.message == CANCELLED_REASON
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.subscriber, self.message)
    }
}

/// The result of one per-subscriber operation.
///
/// Exactly one variant is populated; there is no partially failed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    /// The operation produced a value.
    Success(T),
    /// The operation failed.
    Failure(ErrorInfo),
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for [`Outcome::Failure`].
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Returns the value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns the error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Consumes the outcome, returning the value if successful.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }
}

impl<T: Default> Outcome<T> {
    /// Returns the value, or the type's default for a failure.
    pub fn unwrap_or_default(self) -> T {
        self.into_value().unwrap_or_default()
    }
}
