//! Event sink system for observability.
//!
//! The engine reports step and item lifecycle through an injected
//! [`EventSink`]. Sinks never influence the run: a failing or slow sink
//! must not change any outcome.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event emitted before a step operation is first invoked.
pub const STEP_STARTED: &str = "step.started";
/// Event emitted when a step result is recorded.
pub const STEP_COMPLETED: &str = "step.completed";
/// Event emitted when a step is served from the journal.
pub const STEP_REPLAYED: &str = "step.replayed";
/// Event emitted when a step fails after exhausting retries.
pub const STEP_FAILED: &str = "step.failed";
/// Event emitted when an isolated per-subscriber operation fails.
pub const ITEM_FAILED: &str = "item.failed";
/// Event emitted with the final run report.
pub const RUN_COMPLETED: &str = "run.completed";
