use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cli::config::{HarvestSettings, HarvesterConfig};
use crate::crawler::engine::{CrawlEngine, CrawlEvent, CrawlPlan, EngineStats, FetchFailure, FetchedPage};
use crate::crawler::report::{RunReport, REPORT_FILE_NAME};
use crate::crawler::status::TaskStatusMachine;
use crate::crawler::task::TaskStatus;
use crate::error::{HarvestError, Result};
use crate::harvest::{
    generate_id, CollectionTracker, JobHistory, ObjectStatus, RemoteObjectRegistry, ResultsContainerBuilder,
    ResumePlanner, SkipList,
};
use crate::storage::query::GENERIC_PAGE_TYPE;
use crate::storage::{FileStore, LocalFileStore, Store, UpdateQuery};
use crate::utils::RunStats;

/// Events buffered between the engine and the coordinator
const EVENT_BUFFER: usize = 64;

/// State owned by a single run
#[derive(Debug)]
pub struct RunContext {
    pub task: String,
    pub collection: String,
    pub skip_list: SkipList,
    stats: RunStats,
    failed_urls: Vec<String>,
}

impl RunContext {
    pub fn new(task: impl Into<String>, collection: impl Into<String>, skip_list: SkipList) -> Self {
        Self {
            task: task.into(),
            collection: collection.into(),
            skip_list,
            stats: RunStats::new(),
            failed_urls: Vec::new(),
        }
    }

    pub fn plan(&self) -> CrawlPlan {
        CrawlPlan {
            task: self.task.clone(),
            collection: self.collection.clone(),
            skip_list: self.skip_list.clone(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn failed_urls(&self) -> &[String] {
        &self.failed_urls
    }
}

/// Drives one crawl run: planning, per-page persistence and closing
pub struct RunCoordinator {
    store: Store,
    registry: RemoteObjectRegistry,
    tracker: CollectionTracker,
    planner: ResumePlanner,
    containers: ResultsContainerBuilder,
    status: TaskStatusMachine,
    files: Arc<dyn FileStore>,
    store_all_pages: bool,
}

impl RunCoordinator {
    /// Create a new coordinator
    pub fn new(store: Store, files: Arc<dyn FileStore>, settings: &HarvestSettings) -> Self {
        let history = JobHistory::new(store.clone(), settings.page_size);
        Self {
            registry: RemoteObjectRegistry::new(store.clone()),
            tracker: CollectionTracker::new(store.clone(), settings.page_size),
            planner: ResumePlanner::new(history, settings),
            containers: ResultsContainerBuilder::new(store.clone(), files.clone(), settings.page_size),
            status: TaskStatusMachine::new(store.clone()),
            store,
            files,
            store_all_pages: settings.store_all_pages,
        }
    }

    /// Coordinator for a run started at `run_started`, with the store backend
    /// and share directory named in `config`
    pub fn from_config(config: &HarvesterConfig, run_started: DateTime<Utc>) -> anyhow::Result<Self> {
        let store = Store::create(&config.store)?;
        let files = LocalFileStore::new(&config.files.storage_path, run_started);
        Ok(Self::new(store, Arc::new(files), &config.harvest))
    }

    /// Whether a page of `doc_type` is written to storage
    pub fn should_persist(&self, doc_type: &str) -> bool {
        doc_type != GENERIC_PAGE_TYPE || self.store_all_pages
    }

    /// Mark the task busy, resolve its collection and plan the skip list.
    /// A task this call could not move to BUSY is left as it was; once it is
    /// BUSY, any later failure here fails it.
    pub async fn open<R: Rng + ?Sized>(&self, task: &str, rng: &mut R) -> Result<RunContext> {
        self.status.transition(task, TaskStatus::Busy).await?;

        match self.prepare(task, rng).await {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                if e.is_consistency_violation() {
                    error!("Store holds inconsistent data for task {}: {}", task, e);
                }
                if let Err(fail_err) = self.status.force_failed(task, &e.to_string()).await {
                    error!("Could not mark task {} as failed: {}", task, fail_err);
                }
                Err(e)
            }
        }
    }

    async fn prepare<R: Rng + ?Sized>(&self, task: &str, rng: &mut R) -> Result<RunContext> {
        let collection = self.status.harvest_collection_for_task(task).await?;
        let skip_list = self.planner.plan_skip_list(task, rng).await?;

        info!(
            "Opened run for task {} on collection {} ({} urls skipped)",
            task,
            collection,
            skip_list.len()
        );
        Ok(RunContext::new(task, collection, skip_list))
    }

    /// Persist a fetched page. Any failure fails the task and is returned so
    /// the caller aborts the run.
    pub async fn handle_page(&self, ctx: &mut RunContext, page: FetchedPage) -> Result<()> {
        if !self.should_persist(&page.doc_type) {
            debug!("Not storing generic page {}", page.url);
            ctx.stats.record_ignored();
            return Ok(());
        }

        if let Err(e) = self.persist(ctx, &page).await {
            error!("Failed to write data to the store for {}: {}", page.url, e);
            let err = HarvestError::Persistence {
                url: page.url.clone(),
                source: Box::new(e),
            };
            if let Err(fail_err) = self.status.force_failed(&ctx.task, &err.to_string()).await {
                error!("Could not mark task {} as failed: {}", ctx.task, fail_err);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn persist(&self, ctx: &mut RunContext, page: &FetchedPage) -> Result<()> {
        let object = self
            .registry
            .ensure_remote_data_object(&ctx.collection, &page.url)
            .await?;

        let written = self
            .files
            .write(&format!("{}.html", generate_id()), &page.content)
            .await?;
        let size = written.size;
        let file = written.describe(self.store.resource_base(), "html", "text/html");

        self.store
            .write(&UpdateQuery::InsertPageFile {
                remote_object: object.uri,
                doc_type: page.doc_type.clone(),
                file,
            })
            .await?;

        ctx.stats.record_persisted(size);
        Ok(())
    }

    /// Record a terminal fetch failure for the report; never fatal
    pub fn record_failure(&self, ctx: &mut RunContext, failure: FetchFailure) {
        warn!("{} on {} (Retry {})", failure.class, failure.url, failure.retries);
        ctx.stats.record_failure(failure.class);
        ctx.failed_urls.push(failure.url);
    }

    async fn handle_event(&self, ctx: &mut RunContext, event: CrawlEvent) -> Result<()> {
        match event {
            CrawlEvent::Page(page) => self.handle_page(ctx, page).await,
            CrawlEvent::Failed(failure) => {
                self.record_failure(ctx, failure);
                Ok(())
            }
        }
    }

    /// Build the results container and report, then settle the task.
    /// Never leaves the task BUSY: every failure here ends in FAILED.
    pub async fn close(&self, ctx: &RunContext, engine_stats: EngineStats) -> TaskStatus {
        match self.try_close(ctx, engine_stats).await {
            Ok(status) => status,
            Err(e) => {
                error!("Failure while closing run for task {}: {}", ctx.task, e);
                let reason = format!("failure while closing run: {}", e);
                if let Err(e) = self.status.force_failed(&ctx.task, &reason).await {
                    error!("Could not mark task {} as failed: {}", ctx.task, e);
                }
                TaskStatus::Failed
            }
        }
    }

    async fn try_close(&self, ctx: &RunContext, engine_stats: EngineStats) -> Result<TaskStatus> {
        let container = self
            .containers
            .create_results_container(&ctx.task, &ctx.collection)
            .await?;

        let report = RunReport::new(engine_stats, ctx.stats.clone(), ctx.failed_urls.clone());
        self.containers
            .attach_report(&container, &report.to_json()?, REPORT_FILE_NAME)
            .await?;

        if self
            .tracker
            .has_any_with_status(&ctx.collection, ObjectStatus::Collected)
            .await?
        {
            self.containers.copy_members(&ctx.collection, &container).await?;
            self.status.transition(&ctx.task, TaskStatus::Success).await?;
            Ok(TaskStatus::Success)
        } else {
            error!("Run for task {} closed without collecting files", ctx.task);
            self.status
                .force_failed(&ctx.task, "run closed without collecting files")
                .await?;
            Ok(TaskStatus::Failed)
        }
    }

    /// Run `task` end to end with `engine`
    pub async fn execute<R: Rng + ?Sized>(&self, engine: &dyn CrawlEngine, task: &str, rng: &mut R) -> Result<TaskStatus> {
        let mut ctx = match self.open(task, rng).await {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Could not open run for task {}: {}", task, e);
                return Err(e);
            }
        };

        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let crawl = engine.crawl(ctx.plan(), events);
        let consume = async {
            let mut receiver = receiver;
            while let Some(event) = receiver.recv().await {
                self.handle_event(&mut ctx, event).await?;
            }
            Ok::<(), HarvestError>(())
        };

        let (crawl_result, consume_result) = tokio::join!(crawl, consume);
        consume_result?;

        let engine_stats = match crawl_result {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Crawl engine reported a failure for task {}: {}", task, e);
                let mut stats = EngineStats::new();
                stats.insert("engine_error".to_string(), e.to_string().into());
                stats
            }
        };

        let status = self.close(&ctx, engine_stats).await;
        info!(
            "Run for task {} finished as {} ({} persisted, {} fetch failures)",
            task,
            status,
            ctx.stats().pages_persisted,
            ctx.stats().failure_count()
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::HarvesterConfig;
    use crate::crawler::engine::{EngineError, FailureClass};
    use crate::storage::files::{MockFileStore, WrittenFile};
    use crate::storage::memory::{JobRecord, ObjectRecord, TaskRecord};
    use crate::storage::{MemoryBackend, RetryPolicy};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    const TASK: &str = "http://data.test/tasks/current";
    const JOB: &str = "http://data.test/jobs/current";
    const SCHEDULE: &str = "http://data.test/scheduled-jobs/1";
    const COLLECTION: &str = "http://data.test/collections/current";
    const BESLUIT: &str = "https://data.vlaanderen.be/id/concept/BesluitDocumentType/8e791b27-7600-4577-b24e-c7c29e0eb773";

    /// Engine that replays canned events and records the plan it got
    struct ScriptedEngine {
        events: Vec<CrawlEvent>,
        outcome: std::result::Result<(), String>,
        seen_plan: Mutex<Option<CrawlPlan>>,
    }

    impl ScriptedEngine {
        fn new(events: Vec<CrawlEvent>) -> Self {
            Self {
                events,
                outcome: Ok(()),
                seen_plan: Mutex::new(None),
            }
        }

        fn plan(&self) -> CrawlPlan {
            self.seen_plan.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl CrawlEngine for ScriptedEngine {
        async fn crawl(&self, plan: CrawlPlan, events: mpsc::Sender<CrawlEvent>) -> std::result::Result<EngineStats, EngineError> {
            *self.seen_plan.lock().unwrap() = Some(plan);
            for event in &self.events {
                events.send(event.clone()).await?;
            }
            match &self.outcome {
                Ok(()) => {
                    let mut stats = EngineStats::new();
                    stats.insert("item_scraped_count".to_string(), self.events.len().into());
                    Ok(stats)
                }
                Err(reason) => Err(EngineError::Aborted(reason.clone())),
            }
        }
    }

    fn page(url: &str, doc_type: &str) -> CrawlEvent {
        CrawlEvent::Page(FetchedPage {
            url: url.to_string(),
            content: b"<html>besluit</html>".to_vec(),
            doc_type: doc_type.to_string(),
        })
    }

    fn file_store() -> MockFileStore {
        let mut files = MockFileStore::new();
        files.expect_write().returning(|name, content| {
            Ok(WrittenFile {
                id: generate_id(),
                name: name.to_string(),
                uri: format!("share://run/{}", name),
                size: content.len() as u64,
                created: Utc::now(),
            })
        });
        files
    }

    fn coordinator(memory: &MemoryBackend, files: MockFileStore, incremental: bool) -> RunCoordinator {
        let store = Store::new(Arc::new(memory.clone()), RetryPolicy::immediate(0), "http://data.test/id");
        let mut settings = HarvesterConfig::default().harvest;
        settings.incremental = incremental;
        RunCoordinator::new(store, Arc::new(files), &settings)
    }

    fn seed_task(memory: &MemoryBackend, status: TaskStatus) {
        memory.insert_scheduled_job(SCHEDULE);
        memory.insert_job(
            JOB,
            JobRecord {
                creator: Some(SCHEDULE.to_string()),
                status: TaskStatus::Busy.uri(),
                modified: Utc::now(),
            },
        );
        let mut record = TaskRecord::collecting("current", JOB, status, Utc::now() - Duration::minutes(1));
        record.input_collection = Some(COLLECTION.to_string());
        memory.insert_task(TASK, record);
    }

    /// A prior successful job of the same schedule that collected `count` urls
    fn seed_prior_job(memory: &MemoryBackend, count: usize) {
        let job = "http://data.test/jobs/prior";
        memory.insert_job(
            job,
            JobRecord {
                creator: Some(SCHEDULE.to_string()),
                status: TaskStatus::Success.uri(),
                modified: Utc::now() - Duration::days(2),
            },
        );
        let task = "http://data.test/tasks/prior";
        memory.insert_task(task, TaskRecord::collecting("prior", job, TaskStatus::Success, Utc::now() - Duration::days(2)));

        let mut files = Vec::new();
        for i in 0..count {
            let uri = format!("http://data.test/rdo/prior-{}", i);
            let mut record = ObjectRecord::new(
                &format!("prior-{}", i),
                &format!("https://example.com/prior/{:02}", i),
                ObjectStatus::Collected,
                Utc::now() - Duration::days(2),
            );
            record.doc_type = Some(BESLUIT.to_string());
            memory.insert_object("http://data.test/collections/prior", &uri, record);
            files.push(uri);
        }
        memory.insert_container(task, "http://data.test/containers/prior", files);
    }

    fn single_container(memory: &MemoryBackend) -> crate::storage::memory::ContainerRecord {
        let task = memory.task(TASK).unwrap();
        assert_eq!(task.results_containers.len(), 1);
        memory.container(&task.results_containers[0]).unwrap()
    }

    #[tokio::test]
    async fn test_run_without_collected_pages_fails() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Busy);
        let coordinator = coordinator(&memory, file_store(), false);
        let engine = ScriptedEngine::new(vec![
            page("https://example.com/overview", GENERIC_PAGE_TYPE),
            CrawlEvent::Failed(FetchFailure {
                url: "https://example.com/missing".to_string(),
                class: FailureClass::HttpStatus(404),
                retries: 2,
            }),
        ]);

        let status = coordinator
            .execute(&engine, TASK, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Failed);
        let task = memory.task(TASK).unwrap();
        assert_eq!(task.statuses, vec![TaskStatus::Failed.uri()]);
        assert!(task.error.is_some());

        // Container exists and only holds the report
        let container = single_container(&memory);
        assert_eq!(container.files.len(), 1);
        let report = memory.file(container.files.iter().next().unwrap()).unwrap();
        assert_eq!(report.physical_file.name, REPORT_FILE_NAME);
        assert_eq!(memory.members(COLLECTION).len(), 0);
    }

    #[tokio::test]
    async fn test_incremental_run_collects_and_succeeds() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Scheduled);
        seed_prior_job(&memory, 10);
        let coordinator = coordinator(&memory, file_store(), true);
        let engine = ScriptedEngine::new(vec![
            page("https://example.com/zitting/1/notulen", BESLUIT),
            page("https://example.com/zitting/1/agenda#punt-2", BESLUIT),
            page("https://example.com/zitting/1", GENERIC_PAGE_TYPE),
            page("https://example.com/zitting/2/besluitenlijst;jsessionid=F00D", BESLUIT),
        ]);

        let status = coordinator
            .execute(&engine, TASK, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Success);
        let plan = engine.plan();
        assert_eq!(plan.skip_list.len(), 9);
        assert!(plan.skip_list.iter().all(|url| url.starts_with("https://example.com/prior/")));
        assert_eq!(plan.collection, COLLECTION);

        assert_eq!(memory.task(TASK).unwrap().statuses, vec![TaskStatus::Success.uri()]);
        let container = single_container(&memory);
        assert_eq!(container.files.len(), 4);

        let members = memory.members(COLLECTION);
        assert_eq!(members.len(), 3);
        for member in &members {
            let object = memory.object(member).unwrap();
            assert_eq!(object.status.as_deref(), Some(ObjectStatus::Collected.uri()));
            assert_eq!(object.doc_type.as_deref(), Some(BESLUIT));
            assert!(container.files.contains(member));
        }
    }

    #[tokio::test]
    async fn test_store_all_pages_keeps_generic_pages() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Busy);
        let store = Store::new(Arc::new(memory.clone()), RetryPolicy::immediate(0), "http://data.test/id");
        let mut settings = HarvesterConfig::default().harvest;
        settings.store_all_pages = true;
        let coordinator = RunCoordinator::new(store, Arc::new(file_store()), &settings);

        let mut ctx = RunContext::new(TASK, COLLECTION, SkipList::empty());
        coordinator
            .handle_page(
                &mut ctx,
                FetchedPage {
                    url: "https://example.com/overview".to_string(),
                    content: b"overview".to_vec(),
                    doc_type: GENERIC_PAGE_TYPE.to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(ctx.stats().pages_persisted, 1);
        assert_eq!(ctx.stats().bytes_written, 8);
        assert_eq!(memory.members(COLLECTION).len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_run() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Busy);
        let mut files = MockFileStore::new();
        files
            .expect_write()
            .times(1)
            .returning(|_, _| Err(HarvestError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))));
        let coordinator = coordinator(&memory, files, false);
        let engine = ScriptedEngine::new(vec![
            page("https://example.com/zitting/1/notulen", BESLUIT),
            page("https://example.com/zitting/2/notulen", BESLUIT),
        ]);

        let err = coordinator
            .execute(&engine, TASK, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Persistence { .. }));
        let task = memory.task(TASK).unwrap();
        assert_eq!(task.statuses, vec![TaskStatus::Failed.uri()]);
        assert!(task.error.unwrap().contains("disk full"));
        // Aborted runs are not closed
        assert!(task.results_containers.is_empty());
    }

    #[tokio::test]
    async fn test_closing_failure_forces_failed() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Busy);
        let mut files = MockFileStore::new();
        files
            .expect_write()
            .returning(|_, _| Err(HarvestError::Io(std::io::Error::new(std::io::ErrorKind::Other, "read-only volume"))));
        let coordinator = coordinator(&memory, files, false);
        let ctx = RunContext::new(TASK, COLLECTION, SkipList::empty());

        let status = coordinator.close(&ctx, EngineStats::new()).await;

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(memory.task(TASK).unwrap().statuses, vec![TaskStatus::Failed.uri()]);
    }

    #[tokio::test]
    async fn test_engine_failure_still_closes_run() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Busy);
        let coordinator = coordinator(&memory, file_store(), false);
        let mut engine = ScriptedEngine::new(vec![page("https://example.com/zitting/1/notulen", BESLUIT)]);
        engine.outcome = Err("retries exhausted".to_string());

        let status = coordinator
            .execute(&engine, TASK, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Success);
        assert_eq!(single_container(&memory).files.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_open_read_keeps_finished_task() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Success);
        memory.fail_reads("load-task");
        let coordinator = coordinator(&memory, file_store(), false);
        let engine = ScriptedEngine::new(vec![page("https://example.com/zitting/1/notulen", BESLUIT)]);

        let err = coordinator
            .execute(&engine, TASK, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Store(_)));
        let task = memory.task(TASK).unwrap();
        assert_eq!(task.statuses, vec![TaskStatus::Success.uri()]);
        assert!(task.error.is_none());
        assert_eq!(memory.write_count("fail-active-task"), 0);
        assert!(engine.seen_plan.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_fails_busy_task_without_collection() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Scheduled);
        memory.fail_reads("task-collection");
        let coordinator = coordinator(&memory, file_store(), false);

        let err = coordinator
            .open(TASK, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Store(_)));
        let task = memory.task(TASK).unwrap();
        assert_eq!(task.statuses, vec![TaskStatus::Failed.uri()]);
        assert!(task.error.unwrap().contains("task-collection"));
    }

    #[tokio::test]
    async fn test_from_config_writes_pages_under_storage_path() {
        let share = tempfile::tempdir().unwrap();
        let mut config = HarvesterConfig::default();
        config.store.backend = "memory".to_string();
        config.files.storage_path = share.path().to_path_buf();
        config.harvest.store_all_pages = true;
        let coordinator = RunCoordinator::from_config(&config, Utc::now()).unwrap();
        assert!(coordinator.should_persist(GENERIC_PAGE_TYPE));

        let mut ctx = RunContext::new(TASK, COLLECTION, SkipList::empty());
        coordinator
            .handle_page(
                &mut ctx,
                FetchedPage {
                    url: "https://example.com/overview".to_string(),
                    content: b"overview".to_vec(),
                    doc_type: GENERIC_PAGE_TYPE.to_string(),
                },
            )
            .await
            .unwrap();

        let run_dirs: Vec<_> = std::fs::read_dir(share.path()).unwrap().collect();
        assert_eq!(run_dirs.len(), 1);
        let run_dir = run_dirs[0].as_ref().unwrap().path();
        assert_eq!(std::fs::read_dir(run_dir).unwrap().count(), 1);
        assert_eq!(ctx.stats().pages_persisted, 1);
    }

    #[tokio::test]
    async fn test_finished_task_is_not_reopened() {
        let memory = MemoryBackend::new();
        seed_task(&memory, TaskStatus::Success);
        let coordinator = coordinator(&memory, file_store(), false);
        let engine = ScriptedEngine::new(Vec::new());

        let err = coordinator
            .execute(&engine, TASK, &mut StdRng::seed_from_u64(1))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::InvalidTransition { .. }));
        assert_eq!(memory.task(TASK).unwrap().statuses, vec![TaskStatus::Success.uri()]);
    }
}
