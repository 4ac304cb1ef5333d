//! Run reports and failure collection.

use super::{ErrorInfo, RunIdentity};
use crate::utils::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Message returned when a run finds nobody to email.
pub const NO_SUBSCRIBERS_MESSAGE: &str = "No users found for news email";

/// Record of a per-subscriber failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Subscriber email.
    pub subscriber: String,
    /// Stage the failure happened in.
    pub stage: String,
    /// Failure reason.
    pub reason: String,
    /// When the failure was recorded.
    pub timestamp: Timestamp,
}

impl FailureRecord {
    /// Creates a new failure record stamped with the current time.
    #[must_use]
    pub fn new(
        subscriber: impl Into<String>,
        stage: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            subscriber: subscriber.into(),
            stage: stage.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<ErrorInfo> for FailureRecord {
    fn from(info: ErrorInfo) -> Self {
        Self::new(info.subscriber, info.stage, info.message)
    }
}

/// Fan-in result of the send stage.
///
/// This is the recorded value of the durable send step, so replaying a run
/// returns the same tally without sending again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Sends attempted (subscribers with a summary).
    pub attempted: usize,
    /// Sends that succeeded.
    pub sent: usize,
    /// Subscribers skipped because they had no summary.
    pub skipped: usize,
    /// Sends that failed or were cancelled.
    pub failures: Vec<ErrorInfo>,
}

/// Aggregate result of one workflow run.
///
/// Built once at the end of the run and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Option<Uuid>,
    /// Whether the run executed to completion.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Subscribers enumerated.
    pub subscribers: usize,
    /// Subscribers whose news fetch succeeded.
    pub news_fetched: usize,
    /// Subscribers with a generated summary.
    pub summarized: usize,
    /// Emails attempted.
    pub emails_attempted: usize,
    /// Emails sent successfully.
    pub emails_sent: usize,
    /// Subscribers skipped at the send stage.
    pub skipped: usize,
    /// Per-subscriber failures, in the order they were recorded.
    pub failures: Vec<FailureRecord>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the report was built.
    pub finished_at: Timestamp,
}

impl RunReport {
    /// Returns the failures recorded for one stage.
    #[must_use]
    pub fn failures_in(&self, stage: &str) -> Vec<&FailureRecord> {
        self.failures.iter().filter(|f| f.stage == stage).collect()
    }

    /// Returns true if any subscriber failed at any stage.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Collects counts and failures while a run progresses.
#[derive(Debug)]
pub struct ReportBuilder {
    identity: RunIdentity,
    subscribers: usize,
    news_fetched: usize,
    summarized: usize,
    delivery: DeliveryReport,
    failures: Vec<FailureRecord>,
    failed: HashSet<(String, String)>,
}

impl ReportBuilder {
    /// Creates a builder for the given run.
    #[must_use]
    pub fn new(identity: RunIdentity) -> Self {
        Self {
            identity,
            subscribers: 0,
            news_fetched: 0,
            summarized: 0,
            delivery: DeliveryReport::default(),
            failures: Vec::new(),
            failed: HashSet::new(),
        }
    }

    /// Sets the number of enumerated subscribers.
    pub fn record_subscribers(&mut self, count: usize) {
        self.subscribers = count;
    }

    /// Counts one successful news fetch.
    pub fn record_fetched(&mut self) {
        self.news_fetched += 1;
    }

    /// Counts one generated summary.
    pub fn record_summarized(&mut self) {
        self.summarized += 1;
    }

    /// Records a per-subscriber failure. A subscriber fails a stage at most once.
    pub fn record_failure(&mut self, record: FailureRecord) {
        let key = (record.subscriber.clone(), record.stage.clone());
        if self.failed.insert(key) {
            self.failures.push(record);
        }
    }

    /// Folds the send stage tally into the report.
    pub fn record_delivery(&mut self, delivery: DeliveryReport) {
        for failure in &delivery.failures {
            self.record_failure(failure.clone().into());
        }
        self.delivery = delivery;
    }

    /// Builds the report for a run that found no subscribers.
    #[must_use]
    pub fn no_subscribers(self) -> RunReport {
        self.finish(false, NO_SUBSCRIBERS_MESSAGE.to_string())
    }

    /// Builds the report for a run that was cancelled before completing.
    #[must_use]
    pub fn cancelled(self, reason: &str) -> RunReport {
        let message = format!(
            "Daily news summary cancelled ({reason}): {} of {} subscribers emailed",
            self.delivery.sent, self.subscribers
        );
        self.finish(false, message)
    }

    /// Builds the report for a run that executed to completion.
    #[must_use]
    pub fn completed(self) -> RunReport {
        let message = format!(
            "Daily news summary emails sent successfully: {} of {} subscribers emailed, \
             {} skipped, {} send failures",
            self.delivery.sent,
            self.subscribers,
            self.delivery.skipped,
            self.delivery.failures.len()
        );
        self.finish(true, message)
    }

    /// Builds a report with a caller-supplied message.
    #[must_use]
    pub fn finish(self, success: bool, message: String) -> RunReport {
        RunReport {
            run_id: self.identity.run_id,
            success,
            message,
            subscribers: self.subscribers,
            news_fetched: self.news_fetched,
            summarized: self.summarized,
            emails_attempted: self.delivery.attempted,
            emails_sent: self.delivery.sent,
            skipped: self.delivery.skipped,
            failures: self.failures,
            started_at: self.identity.started_at,
            finished_at: Utc::now(),
        }
    }
}
