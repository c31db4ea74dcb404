use thiserror::Error;

use crate::crawler::task::TaskStatus;

/// Failures raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// The endpoint could not be reached or the request timed out
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status
    #[error("store answered {status}: {body}")]
    Status { status: u16, body: String },

    /// The response did not have the expected shape
    #[error("could not decode store response: {0}")]
    Decode(String),

    /// Backend specific failure (used by the in-memory backend)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Error taxonomy of the orchestration layer
#[derive(Debug, Error)]
pub enum HarvestError {
    /// A single-row lookup returned nothing
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A single-row lookup returned more than one row
    #[error("expected one {entity} for {key}, store returned {rows}")]
    Inconsistent {
        entity: &'static str,
        key: String,
        rows: usize,
    },

    /// A status or operation URI outside the known vocabulary
    #[error("unknown {field} value: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Fatal store failure; updates have already been retried
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Persisting a fetched page failed, which aborts the run
    #[error("failed to persist {url}: {source}")]
    Persistence {
        url: String,
        #[source]
        source: Box<HarvestError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Whether this error means the store holds data we cannot repair
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            HarvestError::Inconsistent { .. } | HarvestError::UnknownValue { .. }
        )
    }
}

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;
