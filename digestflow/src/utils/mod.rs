//! Utility functions for timestamps and email dates.

pub mod timestamps;

pub use timestamps::{formatted_date, formatted_today_date, Timestamp};
