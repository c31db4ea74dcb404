use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::harvest::{clean_url, generate_id, resource_uri, ObjectStatus, RemoteDataObject};
use crate::storage::query::parse_datetime;
use crate::storage::{Lookup, ReadQuery, Row, Store, UpdateQuery};

/// Maps canonical URLs to remote data objects within a collection
#[derive(Clone)]
pub struct RemoteObjectRegistry {
    store: Store,
}

fn object_from_row(row: &Row, url: Option<&str>) -> Result<RemoteDataObject> {
    let status = row.get("status").map(ObjectStatus::from_uri).transpose()?;
    let url = match url {
        Some(url) => url.to_string(),
        None => row.require("url")?.to_string(),
    };

    Ok(RemoteDataObject {
        uri: row.require("dataObject")?.to_string(),
        id: row.require("uuid")?.to_string(),
        url,
        status,
        created: parse_datetime(row.require("created")?)?,
    })
}

impl RemoteObjectRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Look up the object for an already canonical URL
    pub async fn find(&self, collection: &str, url: &str) -> Result<Lookup<RemoteDataObject>> {
        let rows = self
            .store
            .select(&ReadQuery::FindRemoteDataObject {
                collection: collection.to_string(),
                url: url.to_string(),
            })
            .await?;

        Lookup::from_rows(rows).try_map(|row| object_from_row(&row, Some(url)))
    }

    /// Get the object for `url` in `collection`, creating it when absent.
    ///
    /// Lookup and creation are two separate store calls, so two callers
    /// discovering the same URL at the same time may both create an object.
    pub async fn ensure_remote_data_object(&self, collection: &str, url: &str) -> Result<RemoteDataObject> {
        let url = clean_url(url);

        match self.find(collection, &url).await? {
            Lookup::Found(object) => Ok(object),
            Lookup::NotFound => self.create(collection, url).await,
            lookup @ Lookup::Inconsistent(_) => lookup.require("remote data object", &url),
        }
    }

    async fn create(&self, collection: &str, url: String) -> Result<RemoteDataObject> {
        let id = generate_id();
        let object = RemoteDataObject {
            uri: resource_uri(self.store.resource_base(), "remote-data-objects", &id),
            id,
            url,
            status: Some(ObjectStatus::Ready),
            created: Utc::now(),
        };

        self.store
            .write(&UpdateQuery::InsertRemoteDataObject {
                collection: collection.to_string(),
                object: object.clone(),
            })
            .await?;

        debug!("Created remote data object {} for {}", object.uri, object.url);
        Ok(object)
    }

    /// The most recently created object of a collection
    pub async fn latest_remote_data_object(&self, collection: &str) -> Result<RemoteDataObject> {
        let rows = self
            .store
            .select(&ReadQuery::LatestRemoteDataObject {
                collection: collection.to_string(),
            })
            .await?;

        Lookup::from_rows(rows)
            .try_map(|row| object_from_row(&row, None))?
            .require("remote data object", collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarvestError;
    use crate::storage::memory::ObjectRecord;
    use crate::storage::{MemoryBackend, RetryPolicy};
    use chrono::Duration;
    use std::sync::Arc;

    const COLLECTION: &str = "http://data.test/collections/1";

    fn registry() -> (MemoryBackend, RemoteObjectRegistry) {
        let memory = MemoryBackend::new();
        let store = Store::new(Arc::new(memory.clone()), RetryPolicy::immediate(0), "http://data.test/id");
        (memory, RemoteObjectRegistry::new(store))
    }

    #[tokio::test]
    async fn test_equivalent_urls_share_one_object() {
        let (memory, registry) = registry();

        let first = registry
            .ensure_remote_data_object(COLLECTION, "https://example.com/doc;jsessionid=ABC123#top")
            .await
            .unwrap();
        let second = registry
            .ensure_remote_data_object(COLLECTION, "https://example.com/doc")
            .await
            .unwrap();

        assert_eq!(first.uri, second.uri);
        assert_eq!(first.url, "https://example.com/doc");
        assert_eq!(first.status, Some(ObjectStatus::Ready));
        assert!(first.uri.starts_with("http://data.test/id/remote-data-objects/"));
        assert_eq!(memory.members(COLLECTION).len(), 1);
        assert_eq!(memory.write_count("insert-remote-data-object"), 1);
    }

    #[tokio::test]
    async fn test_same_url_in_other_collection_is_distinct() {
        let (_, registry) = registry();

        let a = registry
            .ensure_remote_data_object(COLLECTION, "https://example.com/doc")
            .await
            .unwrap();
        let b = registry
            .ensure_remote_data_object("http://data.test/collections/2", "https://example.com/doc")
            .await
            .unwrap();

        assert_ne!(a.uri, b.uri);
    }

    #[tokio::test]
    async fn test_duplicate_objects_are_a_consistency_violation() {
        let (memory, registry) = registry();
        let now = Utc::now();
        memory.insert_object(COLLECTION, "http://data.test/rdo/1", ObjectRecord::new("1", "https://example.com/doc", ObjectStatus::Ready, now));
        memory.insert_object(COLLECTION, "http://data.test/rdo/2", ObjectRecord::new("2", "https://example.com/doc", ObjectStatus::Ready, now));

        let err = registry
            .ensure_remote_data_object(COLLECTION, "https://example.com/doc")
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Inconsistent { rows: 2, .. }));
        assert_eq!(memory.write_count("insert-remote-data-object"), 0);
    }

    #[tokio::test]
    async fn test_latest_remote_data_object() {
        let (memory, registry) = registry();
        let now = Utc::now();
        memory.insert_object(COLLECTION, "http://data.test/rdo/old", ObjectRecord::new("old", "https://example.com/a", ObjectStatus::Collected, now - Duration::minutes(5)));
        memory.insert_object(COLLECTION, "http://data.test/rdo/new", ObjectRecord::new("new", "https://example.com/b", ObjectStatus::Ready, now));

        let latest = registry.latest_remote_data_object(COLLECTION).await.unwrap();
        assert_eq!(latest.uri, "http://data.test/rdo/new");
        assert_eq!(latest.url, "https://example.com/b");

        let err = registry
            .latest_remote_data_object("http://data.test/collections/empty")
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::NotFound { .. }));
    }
}
