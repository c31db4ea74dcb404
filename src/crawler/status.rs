use chrono::Utc;
use tracing::{info, warn};

use crate::crawler::task::{Task, TaskOperation, TaskStatus};
use crate::error::{HarvestError, Result};
use crate::storage::{Lookup, ReadQuery, Scope, Store, UpdateQuery};

/// Records and transitions task status
#[derive(Clone)]
pub struct TaskStatusMachine {
    store: Store,
}

impl TaskStatusMachine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Load a task; zero or several matching rows are both errors
    pub async fn load_task(&self, task: &str) -> Result<Task> {
        let rows = self
            .store
            .select(&ReadQuery::LoadTask {
                task: task.to_string(),
            })
            .await?;

        Lookup::from_rows(rows)
            .try_map(|row| Task::from_row(task, &row))?
            .require("task", task)
    }

    /// Move a task to `next`, rejecting moves the lifecycle does not allow
    pub async fn transition(&self, task: &str, next: TaskStatus) -> Result<Task> {
        let mut current = self.load_task(task).await?;
        if !current.status.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                task: task.to_string(),
                from: current.status,
                to: next,
            });
        }

        let modified = Utc::now();
        self.store
            .write(&UpdateQuery::UpdateTaskStatus {
                task: task.to_string(),
                status: next,
                modified,
            })
            .await?;

        info!("Task {} moved from {} to {}", task, current.status, next);
        current.status = next;
        current.modified = modified;
        Ok(current)
    }

    /// Store the reason a task failed
    pub async fn record_error(&self, task: &str, message: &str) -> Result<()> {
        self.store
            .write(&UpdateQuery::SetTaskError {
                task: task.to_string(),
                message: message.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Force a task owned by this process to FAILED without reading it first,
    /// so the task never stays BUSY because a read failed. The update only
    /// matches BUSY or SCHEDULED tasks; a finished task keeps its status.
    pub async fn force_failed(&self, task: &str, reason: &str) -> Result<()> {
        if let Err(e) = self.record_error(task, reason).await {
            warn!("Could not record error on task {}: {}", task, e);
        }

        self.store
            .write(&UpdateQuery::FailActiveTask {
                task: task.to_string(),
                modified: Utc::now(),
            })
            .await?;
        warn!("Task {} set to {}: {}", task, TaskStatus::Failed, reason);
        Ok(())
    }

    /// Startup sweep: collecting tasks left SCHEDULED or BUSY by a previous
    /// process are abandoned and become FAILED
    pub async fn recover_stale_tasks(&self) -> Result<()> {
        info!("Failing collecting tasks left busy or scheduled by a previous run");
        self.store
            .write_scoped(
                &UpdateQuery::ForceStatus {
                    operation: TaskOperation::Collecting,
                    from: vec![TaskStatus::Busy, TaskStatus::Scheduled],
                    to: TaskStatus::Failed,
                    modified: Utc::now(),
                },
                Scope::System,
            )
            .await?;
        Ok(())
    }

    /// Harvesting collection of the task's input container
    pub async fn harvest_collection_for_task(&self, task: &str) -> Result<String> {
        let rows = self
            .store
            .select(&ReadQuery::TaskCollection {
                task: task.to_string(),
            })
            .await?;

        Lookup::from_rows(rows)
            .try_map(|row| row.require("collection").map(str::to_string))?
            .require("harvesting collection", task)
    }
}
