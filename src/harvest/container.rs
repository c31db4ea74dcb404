use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::harvest::{generate_id, resource_uri, CollectionTracker, ObjectStatus};
use crate::storage::{FileStore, Store, UpdateQuery};

/// Task-scoped bundle of collected files plus the run report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsContainer {
    pub uri: String,
    pub id: String,
}

/// Allocates results containers and fills them
#[derive(Clone)]
pub struct ResultsContainerBuilder {
    store: Store,
    tracker: CollectionTracker,
    files: Arc<dyn FileStore>,
    page_size: usize,
}

impl ResultsContainerBuilder {
    pub fn new(store: Store, files: Arc<dyn FileStore>, page_size: usize) -> Self {
        Self {
            tracker: CollectionTracker::new(store.clone(), page_size),
            store,
            files,
            page_size,
        }
    }

    /// Allocate a container, link it to `task` and copy the collected members
    /// of `collection` into it
    pub async fn create_results_container(&self, task: &str, collection: &str) -> Result<ResultsContainer> {
        let id = generate_id();
        let container = ResultsContainer {
            uri: resource_uri(self.store.resource_base(), "data-containers", &id),
            id,
        };

        self.store
            .write(&UpdateQuery::InsertResultsContainer {
                task: task.to_string(),
                container: container.uri.clone(),
                uuid: container.id.clone(),
            })
            .await?;
        info!("Created results container {} for task {}", container.uri, task);

        self.copy_members(collection, &container).await?;
        Ok(container)
    }

    /// Link every COLLECTED member of `collection` to the container, in
    /// batches. Linking is set-valued so running this again adds nothing.
    pub async fn copy_members(&self, collection: &str, container: &ResultsContainer) -> Result<usize> {
        let total = self
            .tracker
            .count_objects_by_status(collection, ObjectStatus::Collected)
            .await?;

        let mut offset = 0;
        while offset < total {
            self.store
                .write(&UpdateQuery::CopyCollectedMembers {
                    collection: collection.to_string(),
                    container: container.uri.clone(),
                    limit: self.page_size,
                    offset,
                })
                .await?;
            offset += self.page_size;
        }

        debug!("Copied {} members of {} into {}", total, collection, container.uri);
        Ok(total)
    }

    /// Store the report bytes and record them against the container
    pub async fn attach_report(&self, container: &ResultsContainer, report: &[u8], filename: &str) -> Result<()> {
        let written = self.files.write(filename, report).await?;
        let file = written.describe(self.store.resource_base(), "json", "application/json");

        self.store
            .write(&UpdateQuery::InsertReportFile {
                container: container.uri.clone(),
                file,
            })
            .await?;
        info!("Attached report {} to {}", filename, container.uri);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::files::{MockFileStore, WrittenFile};
    use crate::storage::memory::{ObjectRecord, TaskRecord};
    use crate::storage::{MemoryBackend, RetryPolicy};
    use crate::crawler::task::TaskStatus;
    use chrono::Utc;

    const TASK: &str = "http://data.test/tasks/1";
    const COLLECTION: &str = "http://data.test/collections/1";

    fn written(name: &str) -> WrittenFile {
        WrittenFile {
            id: "phys".to_string(),
            name: name.to_string(),
            uri: format!("share://run/{}", name),
            size: 12,
            created: Utc::now(),
        }
    }

    fn builder(memory: &MemoryBackend, files: MockFileStore, page_size: usize) -> ResultsContainerBuilder {
        let store = Store::new(Arc::new(memory.clone()), RetryPolicy::immediate(0), "http://data.test/id");
        ResultsContainerBuilder::new(store, Arc::new(files), page_size)
    }

    fn seed(memory: &MemoryBackend, collected: usize, ready: usize) {
        let now = Utc::now();
        memory.insert_task(TASK, TaskRecord::collecting("1", "http://data.test/jobs/1", TaskStatus::Busy, now));
        for i in 0..collected + ready {
            let status = if i < collected { ObjectStatus::Collected } else { ObjectStatus::Ready };
            memory.insert_object(
                COLLECTION,
                &format!("http://data.test/rdo/{}", i),
                ObjectRecord::new(&i.to_string(), &format!("https://example.com/{}", i), status, now),
            );
        }
    }

    #[tokio::test]
    async fn test_create_links_and_copies_in_batches() {
        let memory = MemoryBackend::new();
        seed(&memory, 7, 2);
        let builder = builder(&memory, MockFileStore::new(), 3);

        let container = builder.create_results_container(TASK, COLLECTION).await.unwrap();

        assert_eq!(memory.task(TASK).unwrap().results_containers, vec![container.uri.clone()]);
        assert_eq!(memory.container(&container.uri).unwrap().files.len(), 7);
        assert_eq!(memory.write_count("copy-collected-members"), 3);
    }

    #[tokio::test]
    async fn test_copy_includes_objects_sharing_a_url() {
        let memory = MemoryBackend::new();
        seed(&memory, 0, 0);
        for id in ["a", "b", "c"] {
            memory.insert_object(
                COLLECTION,
                &format!("http://data.test/rdo/{}", id),
                ObjectRecord::new(id, "https://example.com/doc", ObjectStatus::Collected, Utc::now()),
            );
        }
        let builder = builder(&memory, MockFileStore::new(), 2);

        let container = builder.create_results_container(TASK, COLLECTION).await.unwrap();

        assert_eq!(memory.container(&container.uri).unwrap().files.len(), 3);
        assert_eq!(memory.write_count("copy-collected-members"), 2);
    }

    #[tokio::test]
    async fn test_copy_twice_does_not_duplicate() {
        let memory = MemoryBackend::new();
        seed(&memory, 4, 1);
        let builder = builder(&memory, MockFileStore::new(), 5000);

        let container = builder.create_results_container(TASK, COLLECTION).await.unwrap();
        builder.copy_members(COLLECTION, &container).await.unwrap();
        builder.copy_members(COLLECTION, &container).await.unwrap();

        assert_eq!(memory.container(&container.uri).unwrap().files.len(), 4);
    }

    #[tokio::test]
    async fn test_attach_report_writes_file_and_links_it() {
        let memory = MemoryBackend::new();
        seed(&memory, 0, 0);
        let mut files = MockFileStore::new();
        files
            .expect_write()
            .withf(|name, content| name == "00-scrape-report.json" && content == b"{}")
            .times(1)
            .returning(|name, _| Ok(written(name)));
        let builder = builder(&memory, files, 5000);

        let container = builder.create_results_container(TASK, COLLECTION).await.unwrap();
        builder.attach_report(&container, b"{}", "00-scrape-report.json").await.unwrap();

        let linked = memory.container(&container.uri).unwrap().files;
        assert_eq!(linked.len(), 1);
        let report = memory.file(linked.iter().next().unwrap()).unwrap();
        assert_eq!(report.physical_file.uri, "share://run/00-scrape-report.json");
        assert_eq!(report.virtual_file.format, "application/json");
    }
}
