//! Per-subscriber pipeline building blocks.
//!
//! This module provides:
//! - [`Isolator`] so one subscriber's failure never aborts the others
//! - [`FallbackResolver`] for the personalized-to-generic news chain
//! - [`FanOut`] to drive one stage across all subscribers concurrently

mod fallback;
mod fanout;
mod isolation;

pub use fallback::FallbackResolver;
pub use fanout::FanOut;
pub use isolation::{Isolator, StageItem};
