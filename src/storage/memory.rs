//! In-memory dataset that interprets the typed queries directly.
//!
//! Used for dry runs (`backend: memory`) and as the store behind the
//! component tests. It follows the semantics of the SPARQL renderings:
//! set-valued membership, DISTINCT + ORDER BY paging and DELETE/INSERT updates
//! that only apply when their WHERE pattern matches.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::crawler::task::{TaskOperation, TaskStatus};
use crate::error::StoreError;
use crate::harvest::ObjectStatus;
use crate::storage::query::{ReadQuery, StoredFile, UpdateQuery, GENERIC_PAGE_TYPE};
use crate::storage::results::{QueryResult, Row};
use crate::storage::{Scope, StoreBackend};

/// A task resource
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub job: String,
    /// Every stored status value; more than one means corrupted data
    pub statuses: Vec<String>,
    pub operation: String,
    pub index: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub error: Option<String>,
    pub input_collection: Option<String>,
    pub results_containers: Vec<String>,
}

impl TaskRecord {
    /// A collecting task with a single status
    pub fn collecting(id: &str, job: &str, status: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            job: job.to_string(),
            statuses: vec![status.uri()],
            operation: TaskOperation::Collecting.uri().to_string(),
            index: "0".to_string(),
            created: at,
            modified: at,
            error: None,
            input_collection: None,
            results_containers: Vec::new(),
        }
    }
}

/// A job resource
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Scheduled job that created this job
    pub creator: Option<String>,
    pub status: String,
    pub modified: DateTime<Utc>,
}

/// A remote data object resource
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub id: String,
    pub url: String,
    pub status: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub doc_type: Option<String>,
}

impl ObjectRecord {
    pub fn new(id: &str, url: &str, status: ObjectStatus, created: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            status: Some(status.uri().to_string()),
            created,
            modified: created,
            doc_type: None,
        }
    }
}

/// A data container resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerRecord {
    pub id: String,
    pub files: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Dataset {
    tasks: BTreeMap<String, TaskRecord>,
    jobs: BTreeMap<String, JobRecord>,
    scheduled_jobs: BTreeSet<String>,
    collections: BTreeMap<String, BTreeSet<String>>,
    objects: BTreeMap<String, ObjectRecord>,
    containers: BTreeMap<String, ContainerRecord>,
    files: BTreeMap<String, StoredFile>,
    reads: HashMap<&'static str, usize>,
    writes: HashMap<&'static str, usize>,
    failing_writes: u32,
    failing_reads: HashSet<&'static str>,
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn page<T: Clone>(items: impl IntoIterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

impl Dataset {
    fn members_with_status(&self, collection: &str, status: ObjectStatus) -> Vec<(&String, &ObjectRecord)> {
        self.collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter_map(|uri| self.objects.get(uri).map(|object| (uri, object)))
            .filter(|(_, object)| object.status.as_deref() == Some(status.uri()))
            .collect()
    }

    fn object_row(uri: &str, object: &ObjectRecord) -> Row {
        let mut row = Row::new()
            .with("dataObject", uri)
            .with("uuid", object.id.as_str())
            .with("url", object.url.as_str())
            .with("created", timestamp(&object.created));
        if let Some(status) = &object.status {
            row = row.with("status", status.as_str());
        }
        row
    }

    fn prior_urls(&self, jobs: &[String]) -> BTreeSet<String> {
        let collecting = TaskOperation::Collecting.uri();
        self.tasks
            .values()
            .filter(|task| jobs.contains(&task.job) && task.operation == collecting)
            .flat_map(|task| task.results_containers.iter())
            .filter_map(|container| self.containers.get(container))
            .flat_map(|container| container.files.iter())
            .filter_map(|file| self.objects.get(file))
            .filter(|object| {
                object
                    .doc_type
                    .as_deref()
                    .map_or(false, |doc_type| doc_type != GENERIC_PAGE_TYPE)
            })
            .map(|object| object.url.clone())
            .collect()
    }

    fn read(&self, query: &ReadQuery) -> QueryResult {
        let rows = match query {
            ReadQuery::LoadTask { task } => match self.tasks.get(task) {
                Some(record) => record
                    .statuses
                    .iter()
                    .map(|status| {
                        let row = Row::new()
                            .with("id", record.id.as_str())
                            .with("job", record.job.as_str())
                            .with("created", timestamp(&record.created))
                            .with("modified", timestamp(&record.modified))
                            .with("status", status.as_str())
                            .with("index", record.index.as_str())
                            .with("operation", record.operation.as_str());
                        match &record.error {
                            Some(error) => row.with("error", error.as_str()),
                            None => row,
                        }
                    })
                    .collect(),
                None => Vec::new(),
            },
            ReadQuery::TaskCollection { task } => self
                .tasks
                .get(task)
                .and_then(|record| record.input_collection.as_ref())
                .map(|collection| Row::new().with("collection", collection.as_str()))
                .into_iter()
                .collect(),
            ReadQuery::FindRemoteDataObject { collection, url } => self
                .collections
                .get(collection)
                .into_iter()
                .flatten()
                .filter_map(|uri| self.objects.get(uri).map(|object| (uri, object)))
                .filter(|(_, object)| &object.url == url)
                .map(|(uri, object)| Self::object_row(uri, object))
                .collect(),
            ReadQuery::LatestRemoteDataObject { collection } => self
                .collections
                .get(collection)
                .into_iter()
                .flatten()
                .filter_map(|uri| self.objects.get(uri).map(|object| (uri, object)))
                .max_by_key(|(_, object)| object.created)
                .map(|(uri, object)| Self::object_row(uri, object))
                .into_iter()
                .collect(),
            ReadQuery::CountMembers { collection, status } => {
                let count = self
                    .members_with_status(collection, *status)
                    .into_iter()
                    .map(|(_, object)| object.url.as_str())
                    .collect::<BTreeSet<_>>()
                    .len();
                vec![Row::new().with("count", count.to_string())]
            }
            ReadQuery::CountMemberObjects { collection, status } => {
                let count = self.members_with_status(collection, *status).len();
                vec![Row::new().with("count", count.to_string())]
            }
            ReadQuery::AnyMember { collection, status } => {
                return QueryResult::Boolean(!self.members_with_status(collection, *status).is_empty());
            }
            ReadQuery::MemberUrls {
                collection,
                status,
                limit,
                offset,
            } => {
                let urls: BTreeSet<String> = self
                    .members_with_status(collection, *status)
                    .into_iter()
                    .map(|(_, object)| object.url.clone())
                    .collect();
                page(urls, *limit, *offset)
                    .into_iter()
                    .map(|url| Row::new().with("url", url))
                    .collect()
            }
            ReadQuery::PriorSuccessfulJobs { task, since } => {
                let current_job = self.tasks.get(task).map(|record| record.job.clone());
                let scheduled_job = current_job
                    .as_ref()
                    .and_then(|job| self.jobs.get(job))
                    .and_then(|job| job.creator.clone())
                    .filter(|creator| self.scheduled_jobs.contains(creator));
                let success = TaskStatus::Success.uri();

                match scheduled_job {
                    Some(scheduled_job) => self
                        .jobs
                        .iter()
                        .filter(|(uri, job)| {
                            Some(*uri) != current_job.as_ref()
                                && job.creator.as_ref() == Some(&scheduled_job)
                                && job.status == success
                                && job.modified > *since
                        })
                        .map(|(uri, _)| Row::new().with("olderJob", uri.as_str()))
                        .collect(),
                    None => Vec::new(),
                }
            }
            ReadQuery::CountPriorUrls { jobs } => {
                vec![Row::new().with("count", self.prior_urls(jobs).len().to_string())]
            }
            ReadQuery::PriorUrls { jobs, limit, offset } => page(self.prior_urls(jobs), *limit, *offset)
                .into_iter()
                .map(|url| Row::new().with("url", url))
                .collect(),
        };
        QueryResult::Rows(rows)
    }

    fn apply(&mut self, update: &UpdateQuery) {
        match update {
            UpdateQuery::InsertRemoteDataObject { collection, object } => {
                self.objects.insert(
                    object.uri.clone(),
                    ObjectRecord::new(&object.id, &object.url, ObjectStatus::Ready, object.created),
                );
                self.collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(object.uri.clone());
            }
            UpdateQuery::InsertResultsContainer {
                task,
                container,
                uuid,
            } => {
                self.containers
                    .entry(container.clone())
                    .or_insert_with(|| ContainerRecord {
                        id: uuid.clone(),
                        files: BTreeSet::new(),
                    });
                if let Some(record) = self.tasks.get_mut(task) {
                    if !record.results_containers.contains(container) {
                        record.results_containers.push(container.clone());
                    }
                }
            }
            UpdateQuery::CopyCollectedMembers {
                collection,
                container,
                limit,
                offset,
            } => {
                let members: Vec<String> = self
                    .members_with_status(collection, ObjectStatus::Collected)
                    .into_iter()
                    .map(|(uri, _)| uri.clone())
                    .collect();
                let selected = page(members, *limit, *offset);
                self.containers
                    .entry(container.clone())
                    .or_default()
                    .files
                    .extend(selected);
            }
            UpdateQuery::InsertPageFile {
                remote_object,
                doc_type,
                file,
            } => {
                if let Some(object) = self.objects.get_mut(remote_object) {
                    if object.status.is_some() {
                        object.status = Some(ObjectStatus::Collected.uri().to_string());
                        object.modified = file.virtual_file.created;
                        object.doc_type = Some(doc_type.clone());
                        self.files.insert(file.virtual_file.uri.clone(), file.clone());
                    }
                }
            }
            UpdateQuery::InsertReportFile { container, file } => {
                self.containers
                    .entry(container.clone())
                    .or_default()
                    .files
                    .insert(file.virtual_file.uri.clone());
                self.files.insert(file.virtual_file.uri.clone(), file.clone());
            }
            UpdateQuery::UpdateTaskStatus {
                task,
                status,
                modified,
            } => {
                if let Some(record) = self.tasks.get_mut(task) {
                    if !record.statuses.is_empty() {
                        record.statuses = vec![status.uri()];
                        record.modified = *modified;
                    }
                }
            }
            UpdateQuery::FailActiveTask { task, modified } => {
                let active = [TaskStatus::Busy.uri(), TaskStatus::Scheduled.uri()];
                if let Some(record) = self.tasks.get_mut(task) {
                    let before = record.statuses.len();
                    record.statuses.retain(|status| !active.contains(status));
                    if record.statuses.len() != before {
                        let failed = TaskStatus::Failed.uri();
                        if !record.statuses.contains(&failed) {
                            record.statuses.push(failed);
                        }
                        record.modified = *modified;
                    }
                }
            }
            UpdateQuery::SetTaskError { task, message } => {
                if let Some(record) = self.tasks.get_mut(task) {
                    record.error = Some(message.clone());
                }
            }
            UpdateQuery::ForceStatus {
                operation,
                from,
                to,
                modified,
            } => {
                let from: Vec<String> = from.iter().map(|status| status.uri()).collect();
                for record in self.tasks.values_mut() {
                    if record.operation != operation.uri() {
                        continue;
                    }
                    let before = record.statuses.len();
                    record.statuses.retain(|status| !from.contains(status));
                    if record.statuses.len() != before {
                        if !record.statuses.contains(&to.uri()) {
                            record.statuses.push(to.uri());
                        }
                        record.modified = *modified;
                    }
                }
            }
        }
    }
}

/// Shared, cloneable in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Dataset>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, Dataset> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_task(&self, uri: &str, record: TaskRecord) {
        self.data().tasks.insert(uri.to_string(), record);
    }

    pub fn insert_job(&self, uri: &str, record: JobRecord) {
        self.data().jobs.insert(uri.to_string(), record);
    }

    pub fn insert_scheduled_job(&self, uri: &str) {
        self.data().scheduled_jobs.insert(uri.to_string());
    }

    /// Add an object as member of a collection
    pub fn insert_object(&self, collection: &str, uri: &str, record: ObjectRecord) {
        let mut data = self.data();
        data.objects.insert(uri.to_string(), record);
        data.collections
            .entry(collection.to_string())
            .or_default()
            .insert(uri.to_string());
    }

    /// Link a results container holding `files` to a task
    pub fn insert_container(&self, task: &str, container: &str, files: impl IntoIterator<Item = String>) {
        let mut data = self.data();
        data.containers
            .entry(container.to_string())
            .or_default()
            .files
            .extend(files);
        if let Some(record) = data.tasks.get_mut(task) {
            record.results_containers.push(container.to_string());
        }
    }

    pub fn task(&self, uri: &str) -> Option<TaskRecord> {
        self.data().tasks.get(uri).cloned()
    }

    pub fn object(&self, uri: &str) -> Option<ObjectRecord> {
        self.data().objects.get(uri).cloned()
    }

    pub fn members(&self, collection: &str) -> BTreeSet<String> {
        self.data().collections.get(collection).cloned().unwrap_or_default()
    }

    pub fn container(&self, uri: &str) -> Option<ContainerRecord> {
        self.data().containers.get(uri).cloned()
    }

    pub fn file(&self, uri: &str) -> Option<StoredFile> {
        self.data().files.get(uri).cloned()
    }

    /// Number of reads executed for a query kind
    pub fn read_count(&self, kind: &str) -> usize {
        self.data().reads.get(kind).copied().unwrap_or(0)
    }

    /// Number of update attempts for an update kind, failed ones included
    pub fn write_count(&self, kind: &str) -> usize {
        self.data().writes.get(kind).copied().unwrap_or(0)
    }

    /// Make the next `n` update attempts fail
    pub fn fail_next_writes(&self, n: u32) {
        self.data().failing_writes = n;
    }

    /// Make every read of the given kind fail
    pub fn fail_reads(&self, kind: &'static str) {
        self.data().failing_reads.insert(kind);
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn query(&self, query: &ReadQuery, _scope: Scope) -> Result<QueryResult, StoreError> {
        let mut data = self.data();
        *data.reads.entry(query.kind()).or_default() += 1;

        if data.failing_reads.contains(query.kind()) {
            return Err(StoreError::Backend(format!("injected {} read failure", query.kind())));
        }
        Ok(data.read(query))
    }

    async fn update(&self, update: &UpdateQuery, _scope: Scope) -> Result<(), StoreError> {
        let mut data = self.data();
        *data.writes.entry(update.kind()).or_default() += 1;

        if data.failing_writes > 0 {
            data.failing_writes -= 1;
            return Err(StoreError::Backend(format!("injected {} update failure", update.kind())));
        }
        data.apply(update);
        Ok(())
    }
}
