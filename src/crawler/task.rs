use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::HarvestError;
use crate::storage::query::parse_datetime;
use crate::storage::results::Row;

const STATUS_BASE: &str = "http://redpencil.data.gift/id/concept/JobStatus/";

/// Lifecycle state of a task (also used for the status of jobs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Scheduled,
    Busy,
    Success,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Scheduled,
        TaskStatus::Busy,
        TaskStatus::Success,
        TaskStatus::Failed,
    ];

    fn name(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Busy => "busy",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    /// Concept URI stored in the triple store
    pub fn uri(self) -> String {
        format!("{}{}", STATUS_BASE, self.name())
    }

    /// Parse a stored status URI, rejecting anything outside the vocabulary
    pub fn from_uri(uri: &str) -> Result<Self, HarvestError> {
        Self::ALL
            .into_iter()
            .find(|status| status.uri() == uri)
            .ok_or_else(|| HarvestError::UnknownValue {
                field: "task status",
                value: uri.to_string(),
            })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Whether `next` is reachable from this status. Rewriting the current
    /// status is always allowed so a forced FAILED can be repeated safely.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match self {
            TaskStatus::Scheduled => matches!(next, TaskStatus::Busy | TaskStatus::Failed),
            _ => matches!(next, TaskStatus::Success | TaskStatus::Failed),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOperation {
    /// Harvesting pages of a collection
    Collecting,
}

impl TaskOperation {
    pub fn uri(self) -> &'static str {
        match self {
            TaskOperation::Collecting => {
                "http://lblod.data.gift/id/jobs/concept/TaskOperation/collecting"
            }
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, HarvestError> {
        if uri == TaskOperation::Collecting.uri() {
            Ok(TaskOperation::Collecting)
        } else {
            Err(HarvestError::UnknownValue {
                field: "task operation",
                value: uri.to_string(),
            })
        }
    }
}

/// A single crawl run as recorded in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Resource URI of the task
    pub uri: String,

    /// Opaque identifier (mu:uuid)
    pub id: String,

    /// Job this task is part of
    pub job: String,

    pub status: TaskStatus,

    pub operation: TaskOperation,

    /// Position of the task within its job
    pub index: String,

    pub created: DateTime<Utc>,

    pub modified: DateTime<Utc>,

    /// Reason recorded when the task failed
    pub error: Option<String>,
}

impl Task {
    /// Build a task from a row of the task lookup query
    pub fn from_row(uri: &str, row: &Row) -> Result<Self, HarvestError> {
        Ok(Self {
            uri: uri.to_string(),
            id: row.require("id")?.to_string(),
            job: row.require("job")?.to_string(),
            status: TaskStatus::from_uri(row.require("status")?)?,
            operation: TaskOperation::from_uri(row.require("operation")?)?,
            index: row.require("index")?.to_string(),
            created: parse_datetime(row.require("created")?)?,
            modified: parse_datetime(row.require("modified")?)?,
            error: row.get("error").map(str::to_string),
        })
    }
}
