//! Timestamp utilities.

use chrono::{DateTime, Datelike, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Formats a date the way it appears in digest emails: `Friday, October 16, 2026`.
#[must_use]
pub fn formatted_date<Tz: chrono::TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}, {} {}, {}",
        date.format("%A"),
        date.format("%B"),
        date.day(),
        date.year()
    )
}

/// Returns today's date (UTC) formatted for digest emails.
#[must_use]
pub fn formatted_today_date() -> String {
    formatted_date(&Utc::now())
}
