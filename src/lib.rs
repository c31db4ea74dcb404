//! Orchestration of resumable harvesting runs over a triple store.

pub mod cli;
pub mod crawler;
pub mod error;
pub mod harvest;
pub mod storage;
pub mod utils;

pub use error::{HarvestError, Result, StoreError};
