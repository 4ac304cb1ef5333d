//! Per-item failure isolation.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::core::{ErrorInfo, Outcome, Subscriber, WorkItem};
use crate::events::{self, EventSink, NoOpEventSink};

/// An item that a per-subscriber stage can run over.
pub trait StageItem: Clone + Send + Sync + 'static {
    /// Identity embedded in the item's step name and failure records.
    fn item_key(&self) -> String;
}

impl StageItem for Subscriber {
    fn item_key(&self) -> String {
        self.email.clone()
    }
}

impl<P: Clone + Send + Sync + 'static> StageItem for WorkItem<P> {
    fn item_key(&self) -> String {
        self.subscriber.email.clone()
    }
}

/// Converts per-item errors into [`Outcome::Failure`].
#[derive(Clone)]
pub struct Isolator {
    events: Arc<dyn EventSink>,
}

impl Default for Isolator {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }
}

impl Isolator {
    /// Creates an isolator reporting to the given sink.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    /// Awaits `operation` for one subscriber. Never fails.
    pub async fn isolate<T, E, Fut>(&self, subscriber: &str, stage: &str, operation: Fut) -> Outcome<T>
    where
        E: Display,
        Fut: Future<Output = Result<T, E>>,
    {
        match operation.await {
            Ok(value) => Outcome::Success(value),
            Err(err) => {
                let info = ErrorInfo::new(subscriber, stage, format!("{err:#}"));
                warn!(subscriber, stage, error = %info.message, "Item failed");
                self.events.try_emit(
                    events::ITEM_FAILED,
                    Some(serde_json::json!({
                        "subscriber": subscriber,
                        "stage": stage,
                        "message": info.message,
                    })),
                );
                Outcome::Failure(info)
            }
        }
    }
}

impl std::fmt::Debug for Isolator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Isolator").finish_non_exhaustive()
    }
}
