//! Bounded fan-out of a per-subscriber stage.

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use super::isolation::{Isolator, StageItem};
use crate::cancellation::CancellationToken;
use crate::core::{ErrorInfo, Outcome};
use crate::events::EventSink;
use crate::steps::{per_item, StepExecutor};

/// Runs one pipeline stage across many items concurrently.
///
/// Every item becomes its own durable step named `"{stage}-{item_key}"`
/// and is isolated, so the result always holds exactly one entry per input
/// item, in input order. At most `max_concurrency` items run at once.
#[derive(Debug, Clone)]
pub struct FanOut {
    executor: Arc<StepExecutor>,
    isolator: Isolator,
    max_concurrency: usize,
    cancellation: Arc<CancellationToken>,
}

impl FanOut {
    /// Creates a fan-out over the given executor.
    #[must_use]
    pub fn new(executor: Arc<StepExecutor>, max_concurrency: usize) -> Self {
        Self {
            executor,
            isolator: Isolator::default(),
            max_concurrency: max_concurrency.max(1),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the event sink used for item failures.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.isolator = Isolator::new(events);
        self
    }

    /// Sets the run-level cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Runs `per_item` for every item of `stage`.
    ///
    /// Items that have not finished when the run is cancelled resolve to
    /// [`Outcome::Failure`] with reason `"cancelled"`; their steps are not
    /// recorded.
    pub async fn run_stage<In, Out, F, Fut>(
        &self,
        stage: &str,
        items: Vec<In>,
        per_item_op: F,
    ) -> Vec<(In, Outcome<Out>)>
    where
        In: StageItem,
        Out: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        debug!(stage, items = items.len(), max_concurrency = self.max_concurrency, "Fanning out");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let operation = Arc::new(per_item_op);

        let handles: Vec<_> = items
            .iter()
            .cloned()
            .map(|item| {
                let semaphore = semaphore.clone();
                let operation = operation.clone();
                let executor = self.executor.clone();
                let isolator = self.isolator.clone();
                let token = self.cancellation.clone();
                let stage = stage.to_string();

                tokio::spawn(async move {
                    let key = item.item_key();
                    let _permit = tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            return Outcome::Failure(ErrorInfo::cancelled(&key, &stage));
                        }
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return Outcome::Failure(ErrorInfo::cancelled(&key, &stage)),
                        },
                    };

                    let name = per_item(&stage, &key);
                    let step = executor.run_step(&name, || operation(item.clone()));
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            debug!(step = %name, "Item cancelled");
                            Outcome::Failure(ErrorInfo::cancelled(&key, &stage))
                        }
                        outcome = isolator.isolate(&key, &stage, step) => outcome,
                    }
                })
            })
            .collect();

        let results = join_all(handles).await;

        items
            .into_iter()
            .zip(results)
            .map(|(item, joined)| {
                let outcome = joined.unwrap_or_else(|err| {
                    let key = item.item_key();
                    error!(stage, subscriber = %key, error = %err, "Item task aborted");
                    Outcome::Failure(ErrorInfo::new(key, stage, format!("task aborted: {err}")))
                });
                (item, outcome)
            })
            .collect()
    }
}
