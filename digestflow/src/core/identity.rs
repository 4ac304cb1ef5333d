//! Run identity for tracking workflow executions.

use crate::utils::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,

    /// The workflow that produced the run (e.g. `daily-news-summary`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    /// When the run started.
    pub started_at: Timestamp,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self {
            run_id: None,
            workflow: None,
            started_at: Utc::now(),
        }
    }
}

impl RunIdentity {
    /// Creates a new run identity with a generated run ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
    }

    /// Creates a run identity with a specific run ID, e.g. when resuming.
    #[must_use]
    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    /// Sets the workflow name.
    #[must_use]
    pub fn with_workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    /// Returns the run ID as a string, or `"-"` when absent.
    #[must_use]
    pub fn run_id_string(&self) -> String {
        self.run_id
            .map_or_else(|| "-".to_string(), |id| id.to_string())
    }
}
