use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::harvest::collection::{fetch_all_pages, single_count, urls};
use crate::storage::{ReadQuery, Store};

/// Resolves what earlier runs of the same schedule already collected
#[derive(Clone)]
pub struct JobHistory {
    store: Store,
    page_size: usize,
}

impl JobHistory {
    pub fn new(store: Store, page_size: usize) -> Self {
        Self { store, page_size }
    }

    /// Successful jobs of the task's schedule modified within the last
    /// `max_age_days`, the task's own job excluded
    pub async fn find_prior_successful_jobs(&self, task: &str, max_age_days: u32) -> Result<Vec<String>> {
        let since = Utc::now() - Duration::days(i64::from(max_age_days));
        let rows = self
            .store
            .select(&ReadQuery::PriorSuccessfulJobs {
                task: task.to_string(),
                since,
            })
            .await?;

        let jobs = rows
            .iter()
            .map(|row| row.require("olderJob").map(str::to_string))
            .collect::<Result<Vec<_>, StoreError>>()?;
        debug!("Found {} prior successful jobs for {}", jobs.len(), task);
        Ok(jobs)
    }

    /// Number of distinct non-generic URLs collected by `jobs`
    pub async fn count_prior_collected_urls(&self, jobs: &[String]) -> Result<usize> {
        if jobs.is_empty() {
            return Ok(0);
        }
        let rows = self
            .store
            .select(&ReadQuery::CountPriorUrls { jobs: jobs.to_vec() })
            .await?;
        single_count(rows, "prior url count", &jobs.join(", "))
    }

    /// Distinct non-generic URLs collected by `jobs`, ascending
    pub async fn list_prior_collected_urls(&self, jobs: &[String]) -> Result<Vec<String>> {
        let total = self.count_prior_collected_urls(jobs).await?;
        info!("{} previously collected urls across {} jobs", total, jobs.len());

        fetch_all_pages(total, self.page_size, |limit, offset| async move {
            let rows = self
                .store
                .select(&ReadQuery::PriorUrls {
                    jobs: jobs.to_vec(),
                    limit,
                    offset,
                })
                .await?;
            urls(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::TaskStatus;
    use crate::harvest::ObjectStatus;
    use crate::storage::memory::{JobRecord, ObjectRecord, TaskRecord};
    use crate::storage::query::GENERIC_PAGE_TYPE;
    use crate::storage::{MemoryBackend, RetryPolicy};
    use std::sync::Arc;

    const SCHEDULE: &str = "http://data.test/scheduled-jobs/1";
    const TASK: &str = "http://data.test/tasks/current";

    fn history(page_size: usize) -> (MemoryBackend, JobHistory) {
        let memory = MemoryBackend::new();
        let store = Store::new(Arc::new(memory.clone()), RetryPolicy::immediate(0), "http://data.test/id");
        (memory, JobHistory::new(store, page_size))
    }

    fn seed_job(memory: &MemoryBackend, job: &str, status: TaskStatus, age_days: i64) {
        memory.insert_job(
            job,
            JobRecord {
                creator: Some(SCHEDULE.to_string()),
                status: status.uri(),
                modified: Utc::now() - Duration::days(age_days),
            },
        );
    }

    /// A prior collecting task whose results container holds one file per url
    fn seed_results(memory: &MemoryBackend, job: &str, urls: &[(&str, &str)]) {
        let task = format!("{}/task", job);
        memory.insert_task(&task, TaskRecord::collecting("t", job, TaskStatus::Success, Utc::now()));

        let mut files = Vec::new();
        for (i, (url, doc_type)) in urls.iter().enumerate() {
            let uri = format!("{}/rdo/{}", job, i);
            let mut record = ObjectRecord::new(&i.to_string(), url, ObjectStatus::Collected, Utc::now());
            record.doc_type = Some(doc_type.to_string());
            memory.insert_object(&format!("{}/collection", job), &uri, record);
            files.push(uri);
        }
        memory.insert_container(&task, &format!("{}/container", job), files);
    }

    fn seed_current(memory: &MemoryBackend) {
        memory.insert_scheduled_job(SCHEDULE);
        seed_job(memory, "http://data.test/jobs/current", TaskStatus::Busy, 0);
        memory.insert_task(
            TASK,
            TaskRecord::collecting("current", "http://data.test/jobs/current", TaskStatus::Busy, Utc::now()),
        );
    }

    #[tokio::test]
    async fn test_prior_jobs_window_and_status() {
        let (memory, history) = history(5000);
        seed_current(&memory);
        seed_job(&memory, "http://data.test/jobs/recent", TaskStatus::Success, 3);
        seed_job(&memory, "http://data.test/jobs/old", TaskStatus::Success, 45);
        seed_job(&memory, "http://data.test/jobs/failed", TaskStatus::Failed, 1);
        memory.insert_job(
            "http://data.test/jobs/other-schedule",
            JobRecord {
                creator: Some("http://data.test/scheduled-jobs/2".to_string()),
                status: TaskStatus::Success.uri(),
                modified: Utc::now(),
            },
        );

        let jobs = history.find_prior_successful_jobs(TASK, 30).await.unwrap();
        assert_eq!(jobs, vec!["http://data.test/jobs/recent".to_string()]);

        let jobs = history.find_prior_successful_jobs(TASK, 60).await.unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[tokio::test]
    async fn test_unscheduled_task_has_no_history() {
        let (memory, history) = history(5000);
        memory.insert_job(
            "http://data.test/jobs/manual",
            JobRecord {
                creator: None,
                status: TaskStatus::Busy.uri(),
                modified: Utc::now(),
            },
        );
        memory.insert_task(
            TASK,
            TaskRecord::collecting("current", "http://data.test/jobs/manual", TaskStatus::Busy, Utc::now()),
        );

        assert!(history.find_prior_successful_jobs(TASK, 30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prior_urls_skip_generic_pages_and_dedup() {
        let (memory, history) = history(2);
        seed_results(
            &memory,
            "http://data.test/jobs/a",
            &[
                ("https://example.com/besluit/1", "https://data.vlaanderen.be/ns/besluit#Besluit"),
                ("https://example.com/index", GENERIC_PAGE_TYPE),
                ("https://example.com/notulen/1", "https://data.vlaanderen.be/ns/besluit#Notulen"),
            ],
        );
        seed_results(
            &memory,
            "http://data.test/jobs/b",
            &[
                ("https://example.com/besluit/1", "https://data.vlaanderen.be/ns/besluit#Besluit"),
                ("https://example.com/agenda/1", "https://data.vlaanderen.be/ns/besluit#Agenda"),
            ],
        );
        let jobs = vec!["http://data.test/jobs/a".to_string(), "http://data.test/jobs/b".to_string()];

        let count = history.count_prior_collected_urls(&jobs).await.unwrap();
        let urls = history.list_prior_collected_urls(&jobs).await.unwrap();

        assert_eq!(count, 3);
        assert_eq!(
            urls,
            vec![
                "https://example.com/agenda/1".to_string(),
                "https://example.com/besluit/1".to_string(),
                "https://example.com/notulen/1".to_string(),
            ]
        );
        assert_eq!(memory.read_count("prior-urls"), 2);
    }

    #[tokio::test]
    async fn test_no_jobs_means_no_store_reads() {
        let (memory, history) = history(5000);

        assert!(history.list_prior_collected_urls(&[]).await.unwrap().is_empty());
        assert_eq!(memory.read_count("count-prior-urls"), 0);
    }
}
