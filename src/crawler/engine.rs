//! Boundary with the crawl engine that fetches pages.
//!
//! The engine owns dispatch, concurrency, HTTP retries and link following.
//! It reports every classified page and every terminal fetch failure through
//! an mpsc channel and returns its own counters when the crawl ends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::harvest::SkipList;

/// Everything the engine needs to start a run
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    pub task: String,
    pub collection: String,
    /// URLs not to enqueue again
    pub skip_list: SkipList,
}

/// A fetched and classified page
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub content: Vec<u8>,
    /// Document type URI assigned by the classifier
    pub doc_type: String,
}

/// Why a fetch was given up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    HttpStatus(u16),
    DnsLookup,
    Timeout,
    Unknown,
}

impl FailureClass {
    /// Key used in the report statistics
    pub fn label(self) -> String {
        match self {
            FailureClass::HttpStatus(code) => format!("http_{}", code),
            FailureClass::DnsLookup => "dns_lookup".to_string(),
            FailureClass::Timeout => "timeout".to_string(),
            FailureClass::Unknown => "unknown".to_string(),
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::HttpStatus(code) => write!(f, "HTTP {} error", code),
            FailureClass::DnsLookup => f.write_str("DNS lookup failed"),
            FailureClass::Timeout => f.write_str("Timeout error"),
            FailureClass::Unknown => f.write_str("Unknown error"),
        }
    }
}

/// Terminal fetch failure, after the engine's own retries
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub url: String,
    pub class: FailureClass,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    Page(FetchedPage),
    Failed(FetchFailure),
}

/// Counters reported by the engine, merged into the run report as-is
pub type EngineStats = Map<String, Value>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine stopped before exhausting its frontier
    #[error("crawl aborted: {0}")]
    Aborted(String),

    /// The coordinator stopped consuming events
    #[error("event channel closed")]
    ChannelClosed,
}

impl From<mpsc::error::SendError<CrawlEvent>> for EngineError {
    fn from(_: mpsc::error::SendError<CrawlEvent>) -> Self {
        EngineError::ChannelClosed
    }
}

#[async_trait]
pub trait CrawlEngine: Send + Sync {
    /// Run the crawl described by `plan`, sending events as they happen
    async fn crawl(&self, plan: CrawlPlan, events: mpsc::Sender<CrawlEvent>) -> Result<EngineStats, EngineError>;
}
