//! Checkpoint domain model.
//!
//! Append-only, typed progress records attached to a task. Sequence numbers
//! are 1-based and dense per task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::clock;
use crate::domain::ids::{CheckpointId, TaskId};

/// Kind of progress a checkpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    /// Initial task plan written
    Plan,
    /// Plan replaced after a failure or mid-flight correction
    Replan,
    /// Incremental progress note
    Progress,
    /// A decision the agent made and why
    Decision,
    /// An error the agent hit
    Error,
    /// Recovery from an error
    Recovery,
    /// Terminal record for a finished task
    Complete,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Replan => "replan",
            Self::Progress => "progress",
            Self::Decision => "decision",
            Self::Error => "error",
            Self::Recovery => "recovery",
            Self::Complete => "complete",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plan" => Some(Self::Plan),
            "replan" => Some(Self::Replan),
            "progress" => Some(Self::Progress),
            "decision" => Some(Self::Decision),
            "error" => Some(Self::Error),
            "recovery" => Some(Self::Recovery),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// An append-only progress record on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier
    pub id: CheckpointId,
    /// Owning task
    pub task_id: TaskId,
    /// Position in the task's checkpoint stream, 1-based and dense
    pub sequence: u32,
    /// What kind of progress this records
    pub checkpoint_type: CheckpointType,
    /// One-line summary
    pub summary: String,
    /// Structured detail
    pub detail: Option<Value>,
    /// Paths touched since the previous checkpoint
    pub files_changed: Option<Vec<String>>,
    /// When recorded
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint at the given per-task sequence position.
    pub fn new(
        task_id: TaskId,
        sequence: u32,
        checkpoint_type: CheckpointType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: CheckpointId::new(),
            task_id,
            sequence,
            checkpoint_type,
            summary: summary.into(),
            detail: None,
            files_changed: None,
            created_at: clock::now(),
        }
    }

    /// Attach structured detail.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Attach the list of files touched.
    pub fn with_files_changed(mut self, files: Vec<String>) -> Self {
        self.files_changed = Some(files);
        self
    }
}
