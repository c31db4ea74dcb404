use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crawler::engine::EngineStats;
use crate::error::Result;
use crate::utils::RunStats;

/// Name of the report file in the results container
pub const REPORT_FILE_NAME: &str = "00-scrape-report.json";

/// Summary of one run, attached to its results container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub stats: Map<String, Value>,
    pub failed_urls: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl RunReport {
    /// Engine counters first; the coordinator's own counters win on key clashes
    pub fn new(engine: EngineStats, run: RunStats, failed_urls: Vec<String>) -> Self {
        let mut stats = engine;
        stats.extend(run.into_map());
        Self {
            stats,
            failed_urls,
            generated_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
