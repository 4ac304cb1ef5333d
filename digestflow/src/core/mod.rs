//! Core domain model types for digestflow.
//!
//! This module contains the data that flows through a run:
//! - Subscribers and their per-stage work items
//! - Per-item outcomes and failure details
//! - The run identity and the final run report

mod identity;
mod outcome;
mod report;
mod subscriber;

pub use identity::RunIdentity;
pub use outcome::{ErrorInfo, Outcome, CANCELLED_REASON};
pub use report::{DeliveryReport, FailureRecord, ReportBuilder, RunReport, NO_SUBSCRIBERS_MESSAGE};
pub use subscriber::{Article, Subscriber, WorkItem};
