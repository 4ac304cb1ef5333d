//! # Digestflow
//!
//! A durable, multi-stage notification workflow engine.
//!
//! Digestflow gathers personalized market news for every subscriber,
//! summarizes it through a generative-text provider and dispatches one
//! email per subscriber. The engine is built around:
//!
//! - **Durable steps**: named units of work checkpointed in a step journal
//!   so a restarted run replays recorded results instead of repeating
//!   side effects
//! - **Per-item isolation**: one subscriber's failure becomes an
//!   [`Outcome::Failure`](crate::core::Outcome) instead of aborting the run
//! - **Fallback resolution**: personalized news first, generic news when
//!   the personalized set is empty
//! - **Bounded fan-out/fan-in**: the same stage driven across every
//!   subscriber concurrently, with results returned in input order
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use digestflow::prelude::*;
//!
//! let config = WorkflowConfig::from_env()?;
//! let generator = Arc::new(GeminiClient::from_workflow_config(&config)?);
//! let workflow = DailyDigestWorkflow::builder()
//!     .config(config)
//!     .subscribers(users)
//!     .news(news)
//!     .generator(generator)
//!     .mailer(mailer)
//!     .build()?;
//!
//! let report = workflow.run().await?;
//! println!("{}", report.message);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod providers;
pub mod steps;
pub mod testing;
pub mod utils;
pub mod workflows;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::WorkflowConfig;
    pub use crate::core::{
        Article, ErrorInfo, FailureRecord, Outcome, RunIdentity, RunReport, Subscriber, WorkItem,
    };
    pub use crate::errors::DigestflowError;
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{FallbackResolver, FanOut, Isolator, StageItem};
    pub use crate::providers::{
        Mailer, NewsSource, NewsSummaryEmail, ProviderResponse, SubscriberSource, TextGenerator,
        WelcomeEmail,
    };
    #[cfg(feature = "gemini")]
    pub use crate::providers::gemini::GeminiClient;
    pub use crate::steps::{
        FileStepJournal, InMemoryStepJournal, RetryConfig, StepExecutor, StepJournal, StepRecord,
    };
    pub use crate::workflows::{DailyDigestWorkflow, SignUpEvent, WelcomeWorkflow};
}
