use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HarvesterConfig {
    pub store: StoreSettings,
    pub harvest: HarvestSettings,
    pub files: FileSettings,
}

/// Triple store settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StoreSettings {
    pub backend: String, // "sparql", "memory"
    pub query_endpoint: String,
    pub update_endpoint: String,
    pub graph: String,
    /// Base URI for resources this service creates
    pub resource_base: String,
    pub timeout_secs: u64,
    pub retry: RetrySettings,
}

/// Backoff for failed updates: wait = base_delay * retry + floor_delay
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub floor_delay_ms: u64,
}

/// Harvest run settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HarvestSettings {
    /// Skip URLs collected by recent successful jobs of the same schedule
    pub incremental: bool,
    pub lookback_days: u32,
    pub page_size: usize,
    /// Share of previously collected URLs fetched again on an incremental run
    pub reverify_fraction: f64,
    /// Persist generic web pages too
    pub store_all_pages: bool,
}

/// File storage settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FileSettings {
    pub storage_path: PathBuf,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                backend: "sparql".to_string(),
                query_endpoint: "http://database:8890/sparql".to_string(),
                update_endpoint: "http://database:8890/sparql".to_string(),
                graph: "http://mu.semte.ch/graphs/harvesting".to_string(),
                resource_base: "http://data.lblod.info/id".to_string(),
                timeout_secs: 60,
                retry: RetrySettings {
                    max_retries: 5,
                    base_delay_ms: 600,
                    floor_delay_ms: 30_000,
                },
            },
            harvest: HarvestSettings {
                incremental: false,
                lookback_days: 30,
                page_size: 5000,
                reverify_fraction: 0.10,
                store_all_pages: false,
            },
            files: FileSettings {
                storage_path: PathBuf::from("/share"),
            },
        }
    }
}

/// Interpret a boolean environment value
fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "yes" | "on" | "true" | "1"
    )
}

impl HarvesterConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let path = if let Some(proj_dirs) =
            directories::ProjectDirs::from("info", "lblod", "harvest-orchestrator")
        {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the config directory if it doesn't exist
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_to_file(&config_path)?;
            Ok(config)
        }
    }

    /// Load the configuration used by the service: an explicit file or the
    /// default one, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        config.apply_env_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))?;

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// Override settings from the service environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("MU_SPARQL_ENDPOINT") {
            self.store.query_endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("MU_SPARQL_UPDATEPOINT") {
            self.store.update_endpoint = endpoint;
        }
        if let Some(graph) = lookup("DEFAULT_GRAPH") {
            self.store.graph = graph;
        }
        if let Some(base) = lookup("RESOURCE_BASE") {
            self.store.resource_base = base;
        }
        if let Some(value) = lookup("INCREMENTAL_RETRIEVAL") {
            self.harvest.incremental = is_truthy(&value);
        }
        if let Some(value) = lookup("STORE_ALL_PAGES") {
            self.harvest.store_all_pages = is_truthy(&value);
        }
    }

    /// Check the settings before anything touches the store
    pub fn validate(&self) -> Result<()> {
        if self.harvest.page_size == 0 {
            anyhow::bail!("harvest.page_size must be greater than zero");
        }
        if !(0.0..1.0).contains(&self.harvest.reverify_fraction) {
            anyhow::bail!(
                "harvest.reverify_fraction must be in [0, 1), got {}",
                self.harvest.reverify_fraction
            );
        }

        for (name, value) in [
            ("store.query_endpoint", &self.store.query_endpoint),
            ("store.update_endpoint", &self.store.update_endpoint),
            ("store.graph", &self.store.graph),
            ("store.resource_base", &self.store.resource_base),
        ] {
            Url::parse(value).context(format!("Invalid URL for {}: {}", name, value))?;
        }

        Ok(())
    }
}
