pub mod collection;
pub mod container;
pub mod history;
pub mod planner;
pub mod registry;
pub mod url;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

// Re-export common types
pub use collection::CollectionTracker;
pub use container::{ResultsContainer, ResultsContainerBuilder};
pub use history::JobHistory;
pub use planner::{ResumePlanner, SkipList};
pub use registry::RemoteObjectRegistry;
pub use self::url::clean_url;

/// Collection status of a remote data object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// Discovered, content not persisted yet
    Ready,
    /// Content persisted
    Collected,
}

impl ObjectStatus {
    pub fn uri(self) -> &'static str {
        match self {
            ObjectStatus::Ready => "http://lblod.data.gift/file-download-statuses/ready-to-be-cached",
            ObjectStatus::Collected => "http://lblod.data.gift/file-download-statuses/collected",
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, HarvestError> {
        [ObjectStatus::Ready, ObjectStatus::Collected]
            .into_iter()
            .find(|status| status.uri() == uri)
            .ok_or_else(|| HarvestError::UnknownValue {
                field: "remote data object status",
                value: uri.to_string(),
            })
    }
}

/// One discovered URL within a harvesting collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDataObject {
    pub uri: String,

    /// Opaque identifier (mu:uuid)
    pub id: String,

    /// Canonical URL, see [`clean_url`]
    pub url: String,

    /// Absent when the store holds no status for the object
    pub status: Option<ObjectStatus>,

    pub created: DateTime<Utc>,
}

/// Derive the URI of a new resource from the configured base
pub fn resource_uri(base: &str, kind: &str, id: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), kind, id)
}

/// Generate an identifier for a new resource
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
