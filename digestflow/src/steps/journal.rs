//! Durable step journal.
//!
//! The journal maps step names to their recorded results. It is the only
//! state shared between concurrent per-subscriber tasks, and every write is
//! keyed by a step name that is unique within the run.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::DigestflowError;
use crate::utils::Timestamp;

/// Resolved state of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepState {
    /// The operation returned a value.
    Completed {
        /// The serialized value.
        value: serde_json::Value,
    },
    /// The operation failed after exhausting its retry policy.
    Failed {
        /// The last error message.
        cause: String,
    },
}

/// A journal entry for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Stable step name, unique within the run.
    pub name: String,
    /// The resolved state.
    #[serde(flatten)]
    pub state: StepState,
    /// Attempts made before the state was resolved.
    pub attempts: usize,
    /// When the record was written.
    pub recorded_at: Timestamp,
}

impl StepRecord {
    /// Creates a completed record.
    #[must_use]
    pub fn completed(name: impl Into<String>, value: serde_json::Value, attempts: usize) -> Self {
        Self {
            name: name.into(),
            state: StepState::Completed { value },
            attempts,
            recorded_at: Utc::now(),
        }
    }

    /// Creates a failed record.
    #[must_use]
    pub fn failed(name: impl Into<String>, cause: impl Into<String>, attempts: usize) -> Self {
        Self {
            name: name.into(),
            state: StepState::Failed {
                cause: cause.into(),
            },
            attempts,
            recorded_at: Utc::now(),
        }
    }

    /// Returns true if the step completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.state, StepState::Completed { .. })
    }
}

/// Storage backend for step records.
#[async_trait]
pub trait StepJournal: Send + Sync {
    /// Gets the record for a step, if it has been executed.
    async fn get(&self, name: &str) -> Result<Option<StepRecord>, DigestflowError>;

    /// Records the result of a step.
    async fn record(&self, record: StepRecord) -> Result<(), DigestflowError>;

    /// Returns the number of recorded steps.
    async fn len(&self) -> usize;

    /// Returns true if no step has been recorded.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Discards every record once the run has reached a terminal state.
    async fn discard(&self) -> Result<(), DigestflowError>;
}

/// In-memory step journal.
///
/// Survives replays within one process; use [`FileStepJournal`] to resume
/// after a restart.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStepJournal {
    entries: Arc<Mutex<HashMap<String, StepRecord>>>,
}

impl InMemoryStepJournal {
    /// Creates a new in-memory journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded step names, sorted.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StepJournal for InMemoryStepJournal {
    async fn get(&self, name: &str) -> Result<Option<StepRecord>, DigestflowError> {
        Ok(self.entries.lock().get(name).cloned())
    }

    async fn record(&self, record: StepRecord) -> Result<(), DigestflowError> {
        self.entries.lock().insert(record.name.clone(), record);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().len()
    }

    async fn discard(&self) -> Result<(), DigestflowError> {
        self.entries.lock().clear();
        Ok(())
    }
}

/// Append-only JSON-lines step journal.
///
/// Each record is written as one line and synced before `record` returns.
/// Opening an existing file replays it, so a restarted run sees every step
/// that completed before the crash.
#[derive(Debug)]
pub struct FileStepJournal {
    path: PathBuf,
    file: Mutex<Option<File>>,
    entries: Mutex<HashMap<String, StepRecord>>,
}

impl FileStepJournal {
    /// Opens or creates a journal at the given path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DigestflowError> {
        let path = path.into();
        let entries = Self::replay(&path)?
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        let file = Self::open_for_append(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            entries: Mutex::new(entries),
        })
    }

    /// Opens the journal for a run inside `dir`, named after the run ID.
    pub fn for_run(dir: impl AsRef<Path>, run_id: &str) -> Result<Self, DigestflowError> {
        fs::create_dir_all(dir.as_ref())?;
        Self::open(dir.as_ref().join(format!("{run_id}.jsonl")))
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record from a journal file. Later lines win.
    pub fn replay(path: &Path) -> Result<Vec<StepRecord>, DigestflowError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: StepRecord = serde_json::from_str(&line).map_err(|e| {
                DigestflowError::Journal(format!(
                    "{}:{}: invalid record: {e}",
                    path.display(),
                    index + 1
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn open_for_append(path: &Path) -> Result<File, DigestflowError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

#[async_trait]
impl StepJournal for FileStepJournal {
    async fn get(&self, name: &str) -> Result<Option<StepRecord>, DigestflowError> {
        Ok(self.entries.lock().get(name).cloned())
    }

    async fn record(&self, record: StepRecord) -> Result<(), DigestflowError> {
        let line = serde_json::to_string(&record)?;
        {
            let mut guard = self.file.lock();
            if guard.is_none() {
                *guard = Some(Self::open_for_append(&self.path)?);
            }
            if let Some(file) = guard.as_mut() {
                writeln!(file, "{line}")?;
                file.sync_all()?;
            }
        }
        self.entries.lock().insert(record.name.clone(), record);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.lock().len()
    }

    async fn discard(&self) -> Result<(), DigestflowError> {
        self.file.lock().take();
        self.entries.lock().clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_in_memory_journal_basic() {
        let journal = InMemoryStepJournal::new();
        assert!(journal.is_empty().await);

        journal
            .record(StepRecord::completed("get-all-users", serde_json::json!([]), 1))
            .await
            .unwrap();

        assert_eq!(journal.len().await, 1);
        let record = journal.get("get-all-users").await.unwrap().unwrap();
        assert!(record.is_completed());
        assert!(journal.get("missing").await.unwrap().is_none());

        journal.discard().await.unwrap();
        assert!(journal.is_empty().await);
    }

    #[test]
    fn test_step_record_serde_shape() {
        let record = StepRecord::failed("summarize-news-a@example.com", "HTTP 500", 3);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["cause"], "HTTP 500");
        assert_eq!(value["attempts"], 3);
    }

    #[tokio::test]
    async fn test_file_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");

        {
            let journal = FileStepJournal::open(&path).unwrap();
            journal
                .record(StepRecord::completed(
                    "get-all-users",
                    serde_json::json!([{"email": "a@example.com"}]),
                    1,
                ))
                .await
                .unwrap();
            journal
                .record(StepRecord::failed("fetch-user-news-a@example.com", "boom", 3))
                .await
                .unwrap();
        }

        let reopened = FileStepJournal::open(&path).unwrap();
        assert_eq!(reopened.len().await, 2);
        let users = reopened.get("get-all-users").await.unwrap().unwrap();
        assert_eq!(
            users.state,
            StepState::Completed {
                value: serde_json::json!([{"email": "a@example.com"}])
            }
        );
    }

    #[tokio::test]
    async fn test_file_journal_discard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileStepJournal::for_run(dir.path(), "run-1").unwrap();
        journal
            .record(StepRecord::completed("send-news-emails", serde_json::json!({}), 1))
            .await
            .unwrap();
        assert!(journal.path().exists());

        journal.discard().await.unwrap();
        assert!(!journal.path().exists());
        assert!(journal.is_empty().await);
    }

    #[test]
    fn test_replay_rejects_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{not json}\n").unwrap();

        let err = FileStepJournal::replay(&path).unwrap_err();
        assert!(matches!(err, DigestflowError::Journal(_)));
    }

    #[test]
    fn test_replay_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = FileStepJournal::replay(&dir.path().join("absent.jsonl")).unwrap();
        assert!(records.is_empty());
    }
}
