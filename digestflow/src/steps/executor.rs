//! Durable step executor.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::journal::{StepJournal, StepRecord, StepState};
use super::retry::{with_retry, RetryConfig};
use crate::errors::{is_retryable, DigestflowError};
use crate::events::{self, EventSink, NoOpEventSink};

/// Runs named units of work at most once per run.
///
/// Results are recorded in a [`StepJournal`]. Asking for a step name that
/// is already recorded returns the recorded value (or failure) without
/// invoking the operation again, so side effects are not duplicated when a
/// run is replayed after a restart.
///
/// Step names must be unique within the run. A per-item step has to embed
/// the item identity (see [`per_item`](super::per_item)); otherwise every
/// item after the first replays the first item's result.
pub struct StepExecutor {
    journal: Arc<dyn StepJournal>,
    retry: RetryConfig,
    events: Arc<dyn EventSink>,
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl StepExecutor {
    /// Creates an executor over the given journal.
    #[must_use]
    pub fn new(journal: Arc<dyn StepJournal>, retry: RetryConfig) -> Self {
        Self {
            journal,
            retry,
            events: Arc::new(NoOpEventSink),
            in_flight: DashMap::new(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<dyn StepJournal> {
        &self.journal
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Runs `operation` as the step `name`, or replays its recorded result.
    ///
    /// The operation is retried per the executor's [`RetryConfig`]. Once
    /// retries are exhausted the failure is recorded and returned as
    /// [`DigestflowError::StepFailure`]. Cancellation is never recorded, so
    /// a cancelled step runs again when the run is resumed.
    pub async fn run_step<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, DigestflowError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        // Serialize concurrent callers of the same name so the operation runs once.
        let lock = self.in_flight.entry(name.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(name, operation).await
        };
        drop(lock);
        // Only the map still holds the lock once every caller is done.
        self.in_flight
            .remove_if(name, |_, entry| Arc::strong_count(entry) == 1);
        result
    }

    /// Number of step names with a caller currently holding or awaiting the lock.
    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    async fn run_locked<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, DigestflowError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        if let Some(record) = self.journal.get(name).await? {
            return self.replay(record);
        }

        debug!(step = name, "Executing step");
        self.events
            .try_emit(events::STEP_STARTED, Some(serde_json::json!({ "step": name })));

        match with_retry(&self.retry, name, operation, is_retryable).await {
            Ok((value, attempts)) => {
                let encoded = serde_json::to_value(&value)?;
                self.journal
                    .record(StepRecord::completed(name, encoded, attempts))
                    .await?;
                info!(step = name, attempts, "Step completed");
                self.events
                    .try_emit(events::STEP_COMPLETED, Some(serde_json::json!({ "step": name })));
                Ok(value)
            }
            Err((err, attempts)) => {
                if let Some(DigestflowError::Cancelled(reason)) =
                    err.downcast_ref::<DigestflowError>()
                {
                    return Err(DigestflowError::Cancelled(reason.clone()));
                }
                let cause = format!("{err:#}");
                warn!(step = name, attempts, error = %cause, "Step failed");
                self.journal
                    .record(StepRecord::failed(name, cause.clone(), attempts))
                    .await?;
                self.events.try_emit(
                    events::STEP_FAILED,
                    Some(serde_json::json!({ "step": name, "attempts": attempts, "cause": cause })),
                );
                Err(DigestflowError::step_failure(name, cause))
            }
        }
    }

    fn replay<T: DeserializeOwned>(&self, record: StepRecord) -> Result<T, DigestflowError> {
        debug!(step = %record.name, "Replaying recorded step");
        self.events.try_emit(
            events::STEP_REPLAYED,
            Some(serde_json::json!({ "step": record.name })),
        );
        match record.state {
            StepState::Completed { value } => Ok(serde_json::from_value(value)?),
            StepState::Failed { cause } => Err(DigestflowError::step_failure(record.name, cause)),
        }
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("retry", &self.retry)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}
