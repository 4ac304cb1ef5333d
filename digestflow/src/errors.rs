//! Error types for the digestflow engine.
//!
//! Only run-level (fatal) conditions surface as [`DigestflowError`].
//! Per-subscriber failures are captured as
//! [`Outcome::Failure`](crate::core::Outcome) and never reach this type.

use thiserror::Error;

/// The main error type for digestflow operations.
#[derive(Debug, Error)]
pub enum DigestflowError {
    /// A durable step failed after exhausting its retry policy.
    #[error("Step '{name}' failed: {cause}")]
    StepFailure {
        /// The step name.
        name: String,
        /// The last error raised by the step operation.
        cause: String,
    },

    /// A required credential is missing from the configuration.
    #[error("Missing required credential: {0}")]
    MissingCredential(String),

    /// The run was cancelled or timed out.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// The step journal could not be read or written.
    #[error("Step journal error: {0}")]
    Journal(String),

    /// The generative-text provider could not be reached.
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DigestflowError {
    /// Creates a step failure error.
    #[must_use]
    pub fn step_failure(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::StepFailure {
            name: name.into(),
            cause: cause.into(),
        }
    }

    /// Returns true if retrying the failed operation cannot change the result.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential(_)
                | Self::Cancelled(_)
                | Self::Config(_)
                | Self::Provider(ProviderError::MissingApiKey)
        )
    }
}

impl From<serde_json::Error> for DigestflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised at the generative-text provider boundary.
///
/// A rejected request (non-2xx) is not an error here; it decodes to
/// [`ProviderResponse::HttpError`](crate::providers::ProviderResponse).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key was configured, so no request was attempted.
    #[error("Generative-text API key is not configured")]
    MissingApiKey,

    /// The request could not be sent or the response body not read.
    #[error("Provider transport error: {0}")]
    Transport(String),

    /// The response body was not valid JSON.
    #[error("Provider response could not be decoded: {0}")]
    Decode(String),
}

#[cfg(feature = "gemini")]
impl From<reqwest::Error> for ProviderError {
    /// Drops the request URL, which carries the API key as a query parameter.
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Returns true if an operation error is worth retrying.
///
/// Errors that wrap a permanent [`DigestflowError`] or
/// [`ProviderError::MissingApiKey`] are not retried.
#[must_use]
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(err) = err.downcast_ref::<DigestflowError>() {
        return !err.is_permanent();
    }
    !matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::MissingApiKey)
    )
}
