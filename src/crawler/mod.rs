pub mod controller;
pub mod engine;
pub mod report;
pub mod status;
pub mod task;

// Re-export common types
pub use controller::{RunContext, RunCoordinator};
pub use engine::{CrawlEngine, CrawlEvent, CrawlPlan, EngineError, EngineStats, FailureClass, FetchFailure, FetchedPage};
pub use report::RunReport;
pub use status::TaskStatusMachine;
pub use task::{Task, TaskOperation, TaskStatus};
