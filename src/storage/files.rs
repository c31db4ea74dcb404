use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::HarvestError;
use crate::harvest::{generate_id, resource_uri};
use crate::storage::query::{FileMetadata, StoredFile};

/// URI scheme of files on the shared volume
const SHARE_SCHEME: &str = "share://";

/// A file written to physical storage
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenFile {
    pub id: String,
    pub name: String,
    /// `share://` URI of the physical file
    pub uri: String,
    pub size: u64,
    pub created: DateTime<Utc>,
}

impl WrittenFile {
    /// Describe this physical file together with a new virtual file for it
    pub fn describe(&self, resource_base: &str, extension: &str, format: &str) -> StoredFile {
        let id = generate_id();
        StoredFile {
            virtual_file: FileMetadata {
                uri: resource_uri(resource_base, "files", &id),
                name: format!("{}.{}", id, extension),
                uuid: id,
                format: format.to_string(),
                extension: extension.to_string(),
                size: self.size,
                created: self.created,
            },
            physical_file: FileMetadata {
                uri: self.uri.clone(),
                uuid: self.id.clone(),
                name: self.name.clone(),
                format: format.to_string(),
                extension: extension.to_string(),
                size: self.size,
                created: self.created,
            },
        }
    }
}

/// Physical storage of page contents and reports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Write `content` under `name` in the run's directory
    async fn write(&self, name: &str, content: &[u8]) -> Result<WrittenFile, HarvestError>;
}

/// Files on a local (shared) volume, one directory per run
pub struct LocalFileStore {
    share_root: PathBuf,
    run_dir: PathBuf,
}

impl LocalFileStore {
    /// Create a store writing to `<share_root>/<run timestamp>/`
    pub fn new(share_root: impl Into<PathBuf>, run_started: DateTime<Utc>) -> Self {
        let share_root = share_root.into();
        let run_dir = share_root.join(run_started.format("%Y-%m-%dT%H:%M:%S%.6f").to_string());
        Self { share_root, run_dir }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn share_uri(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.share_root).unwrap_or(path);
        format!("{}{}", SHARE_SCHEME, relative.to_string_lossy())
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn write(&self, name: &str, content: &[u8]) -> Result<WrittenFile, HarvestError> {
        fs::create_dir_all(&self.run_dir).await?;

        let path = self.run_dir.join(name);
        fs::write(&path, content).await?;
        let size = fs::metadata(&path).await?.len();
        debug!("Wrote {} bytes to {}", size, path.display());

        Ok(WrittenFile {
            id: generate_id(),
            name: name.to_string(),
            uri: self.share_uri(&path),
            size,
            created: Utc::now(),
        })
    }
}
