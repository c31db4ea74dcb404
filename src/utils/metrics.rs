use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::crawler::engine::FailureClass;

/// Counters kept by the coordinator for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStats {
    /// Start time of the run
    pub start_time: DateTime<Utc>,

    /// Pages written to file storage and linked in the store
    pub pages_persisted: usize,

    /// Generic pages that were fetched but not persisted
    pub pages_ignored: usize,

    /// Bytes written to file storage
    pub bytes_written: u64,

    /// Terminal fetch failures per class label
    pub failures: BTreeMap<String, usize>,
}

impl RunStats {
    /// Create new, zeroed stats
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            pages_persisted: 0,
            pages_ignored: 0,
            bytes_written: 0,
            failures: BTreeMap::new(),
        }
    }

    pub fn record_persisted(&mut self, bytes: u64) {
        self.pages_persisted += 1;
        self.bytes_written += bytes;
    }

    pub fn record_ignored(&mut self) {
        self.pages_ignored += 1;
    }

    pub fn record_failure(&mut self, class: FailureClass) {
        *self.failures.entry(class.label()).or_default() += 1;
    }

    pub fn failure_count(&self) -> usize {
        self.failures.values().sum()
    }

    /// Flatten into report statistics, under a `harvest/` prefix
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("harvest/start_time".to_string(), Value::from(self.start_time.to_rfc3339()));
        map.insert("harvest/finish_time".to_string(), Value::from(Utc::now().to_rfc3339()));
        map.insert("harvest/pages_persisted".to_string(), Value::from(self.pages_persisted));
        map.insert("harvest/pages_ignored".to_string(), Value::from(self.pages_ignored));
        map.insert("harvest/bytes_written".to_string(), Value::from(self.bytes_written));
        for (label, count) in self.failures {
            map.insert(format!("harvest/failures/{}", label), Value::from(count));
        }
        map
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
