//! Tests for the durable step executor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;
use crate::errors::{DigestflowError, ProviderError};
use crate::events::{self, CollectingEventSink};

fn fast_retry(attempts: usize) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(attempts)
        .with_base_delay_ms(1)
        .with_jitter(JitterStrategy::None)
}

fn new_executor(journal: Arc<dyn StepJournal>) -> StepExecutor {
    StepExecutor::new(journal, fast_retry(3))
}

#[tokio::test]
async fn test_same_name_executes_once() {
    let executor = new_executor(Arc::new(InMemoryStepJournal::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = calls.clone();
        let value: Vec<String> = executor
            .run_step(GET_ALL_USERS, move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["a@example.com".to_string()])
                }
            })
            .await
            .unwrap();
        assert_eq!(value, vec!["a@example.com".to_string()]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recorded_failure_is_replayed() {
    let executor = new_executor(Arc::new(InMemoryStepJournal::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = calls.clone();
        let err = executor
            .run_step::<u32, _, _>("fetch-user-news-a@example.com", move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("upstream unavailable"))
                }
            })
            .await
            .unwrap_err();

        match err {
            DigestflowError::StepFailure { name, cause } => {
                assert_eq!(name, "fetch-user-news-a@example.com");
                assert!(cause.contains("upstream unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // Three attempts on the first call, none on the replay.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let journal = Arc::new(InMemoryStepJournal::new());
    let executor = new_executor(journal.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let value: String = {
        let calls = calls.clone();
        executor
            .run_step("summarize-news-a@example.com", move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Err(anyhow::Error::from(ProviderError::Transport(
                            "connection reset".into(),
                        )))
                    } else {
                        Ok("summary".to_string())
                    }
                }
            })
            .await
            .unwrap()
    };

    assert_eq!(value, "summary");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let record = journal
        .get("summarize-news-a@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let executor = new_executor(Arc::new(InMemoryStepJournal::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let result = {
        let calls = calls.clone();
        executor
            .run_step::<String, _, _>(CALL_GEMINI_API, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::Error::from(ProviderError::MissingApiKey)) }
            })
            .await
    };

    assert!(matches!(result, Err(DigestflowError::StepFailure { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_step_is_not_recorded() {
    let journal = Arc::new(InMemoryStepJournal::new());
    let executor = new_executor(journal.clone());

    let result = executor
        .run_step::<u32, _, _>(SEND_NEWS_EMAILS, || async {
            Err(anyhow::Error::from(DigestflowError::Cancelled(
                "shutdown".into(),
            )))
        })
        .await;

    assert!(matches!(result, Err(DigestflowError::Cancelled(reason)) if reason == "shutdown"));
    assert!(journal.is_empty().await);

    let value: u32 = executor
        .run_step(SEND_NEWS_EMAILS, || async { Ok(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_execution() {
    let executor = Arc::new(new_executor(Arc::new(InMemoryStepJournal::new())));
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let executor = executor.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                executor
                    .run_step("summarize-news-shared@example.com", move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok::<_, anyhow::Error>(41_u32 + 1)
                        }
                    })
                    .await
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.in_flight_len(), 0);
}

#[tokio::test]
async fn test_step_locks_released_after_completion() {
    let executor = new_executor(Arc::new(InMemoryStepJournal::new()));

    for i in 0..20 {
        let name = per_item(FETCH_USER_NEWS, &format!("user{i}@example.com"));
        let _: usize = executor.run_step(&name, move || async move { Ok(i) }).await.unwrap();
    }
    let err = executor
        .run_step::<u8, _, _>(GET_ALL_USERS, || async { Err(anyhow::anyhow!("down")) })
        .await
        .unwrap_err();

    assert!(matches!(err, DigestflowError::StepFailure { .. }));
    assert_eq!(executor.in_flight_len(), 0);
}

#[tokio::test]
async fn test_file_journal_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.jsonl");
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let journal = Arc::new(FileStepJournal::open(&path).unwrap());
        let executor = new_executor(journal);
        let calls = calls.clone();
        let value: Vec<u32> = executor
            .run_step(GET_ALL_USERS, move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                }
            })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lifecycle_events_are_emitted() {
    let sink = Arc::new(CollectingEventSink::new());
    let executor =
        new_executor(Arc::new(InMemoryStepJournal::new())).with_events(sink.clone());

    for _ in 0..2 {
        let value: u8 = executor
            .run_step(GET_ALL_USERS, || async { Ok(1) })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    assert_eq!(sink.step_names(events::STEP_STARTED), vec![GET_ALL_USERS]);
    assert_eq!(sink.step_names(events::STEP_COMPLETED), vec![GET_ALL_USERS]);
    assert_eq!(sink.step_names(events::STEP_REPLAYED), vec![GET_ALL_USERS]);
}

#[test]
fn test_per_item_name() {
    assert_eq!(
        per_item(FETCH_USER_NEWS, "ann@example.com"),
        "fetch-user-news-ann@example.com"
    );
}
