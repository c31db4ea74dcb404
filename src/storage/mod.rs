pub mod files;
pub mod memory;
pub mod query;
pub mod results;
pub mod sparql;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cli::config::{RetrySettings, StoreSettings};
use crate::error::StoreError;

// Re-export common types
pub use files::{FileStore, LocalFileStore};
pub use memory::MemoryBackend;
pub use query::{ReadQuery, UpdateQuery};
pub use results::{Lookup, QueryResult, Row};
pub use sparql::SparqlBackend;

/// Authorization scope a query runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The regular harvesting dataset
    Dataset,
    /// Elevated system scope, only used by startup recovery
    System,
}

/// Raw access to the graph-structured dataset
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Execute a read query
    async fn query(&self, query: &ReadQuery, scope: Scope) -> Result<QueryResult, StoreError>;

    /// Execute an update
    async fn update(&self, update: &UpdateQuery, scope: Scope) -> Result<(), StoreError>;
}

/// Backoff schedule for failed updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Added once per retry already made
    pub base_delay: Duration,

    /// Minimum wait before any retry
    pub floor_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            floor_delay: Duration::from_millis(settings.floor_delay_ms),
        }
    }

    /// Retry without waiting
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            floor_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (0 for the first retry)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * retry + self.floor_delay
    }
}

/// Store gateway: every component talks to the dataset through this type.
///
/// Updates are retried with a fixed backoff until the retry bound is reached;
/// reads are executed once and their failures surface immediately.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StoreBackend>,
    retry: RetryPolicy,
    resource_base: String,
}

impl Store {
    pub fn new(backend: Arc<dyn StoreBackend>, retry: RetryPolicy, resource_base: impl Into<String>) -> Self {
        Self {
            backend,
            retry,
            resource_base: resource_base.into(),
        }
    }

    /// Create a store gateway based on the settings
    pub fn create(settings: &StoreSettings) -> AnyResult<Self> {
        let backend: Arc<dyn StoreBackend> = match settings.backend.as_str() {
            "sparql" => Arc::new(SparqlBackend::new(settings)?),
            "memory" => {
                warn!("Using the in-memory store backend, nothing will be persisted");
                Arc::new(MemoryBackend::new())
            }
            _ => {
                anyhow::bail!("Unsupported store backend: {}", settings.backend);
            }
        };

        Ok(Self::new(
            backend,
            RetryPolicy::from_settings(&settings.retry),
            settings.resource_base.clone(),
        ))
    }

    /// Base URI new resources are minted under
    pub fn resource_base(&self) -> &str {
        &self.resource_base
    }

    pub async fn read(&self, query: &ReadQuery) -> Result<QueryResult, StoreError> {
        self.read_scoped(query, Scope::Dataset).await
    }

    pub async fn read_scoped(&self, query: &ReadQuery, scope: Scope) -> Result<QueryResult, StoreError> {
        let started = Instant::now();
        let result = self.backend.query(query, scope).await;
        debug!("{} query took {:?}", query.kind(), started.elapsed());
        result
    }

    /// Read a SELECT query and return its rows
    pub async fn select(&self, query: &ReadQuery) -> Result<Vec<Row>, StoreError> {
        self.read(query).await?.into_rows()
    }

    pub async fn write(&self, update: &UpdateQuery) -> Result<(), StoreError> {
        self.write_scoped(update, Scope::Dataset).await
    }

    pub async fn write_scoped(&self, update: &UpdateQuery, scope: Scope) -> Result<(), StoreError> {
        let mut retries = 0;

        loop {
            let started = Instant::now();
            match self.backend.update(update, scope).await {
                Ok(()) => {
                    debug!("{} update took {:?}", update.kind(), started.elapsed());
                    return Ok(());
                }
                Err(e) if retries < self.retry.max_retries => {
                    let wait = self.retry.delay_for(retries);
                    retries += 1;
                    warn!(
                        "Executing {} update failed unexpectedly: {}. Retrying after {:?} [{}/{}]",
                        update.kind(),
                        e,
                        wait,
                        retries,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    warn!("Max attempts reached for {} update, giving up", update.kind());
                    return Err(e);
                }
            }
        }
    }
}
