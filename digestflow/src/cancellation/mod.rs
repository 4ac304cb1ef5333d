//! Cooperative cancellation for workflow runs.
//!
//! A run-level token is shared by every per-subscriber task. Cancelling it
//! (explicitly or through the run timeout) stops outstanding work without
//! touching step results that were already recorded.

mod token;

pub use token::{spawn_timeout, CancellationToken};
