use anyhow::{Context, Result};
use tracing::info;

use crate::cli::config::HarvesterConfig;
use crate::crawler::TaskStatusMachine;
use crate::storage::Store;

/// Fail every collecting task a previous process left SCHEDULED or BUSY
pub async fn recover(config: &HarvesterConfig) -> Result<()> {
    let store = Store::create(&config.store)?;
    TaskStatusMachine::new(store)
        .recover_stale_tasks()
        .await
        .context("Startup recovery failed")?;

    info!("Startup recovery complete");
    Ok(())
}

/// Print the recorded state of a task
pub async fn status(config: &HarvesterConfig, task: &str) -> Result<()> {
    let store = Store::create(&config.store)?;
    let machine = TaskStatusMachine::new(store);

    let task = machine
        .load_task(task)
        .await
        .context(format!("Failed to load task: {}", task))?;

    // Display status information
    println!("Task: {}", task.uri);
    println!("Job: {}", task.job);
    println!("Status: {}", task.status);
    println!("Created: {}", task.created);
    println!("Last Updated: {}", task.modified);

    if let Some(error) = &task.error {
        println!("Error: {}", error);
    }

    Ok(())
}
