use std::future::Future;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::harvest::ObjectStatus;
use crate::storage::{Lookup, ReadQuery, Row, Store};

/// Count-first-then-paginate: fetch pages of `page_size` until `total` rows
/// have been gathered. `total` is fixed by the caller before the first page,
/// so rows added while paging never extend the loop.
pub(crate) async fn fetch_all_pages<F, Fut>(total: usize, page_size: usize, mut fetch: F) -> Result<Vec<String>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let mut values = Vec::with_capacity(total);
    let mut offset = 0;

    while values.len() < total {
        let page = fetch(page_size, offset).await?;
        if page.is_empty() {
            // Rows vanished since counting
            break;
        }
        offset += page_size;
        values.extend(page);
    }

    values.truncate(total);
    Ok(values)
}

/// Read a single `?count` binding
pub(crate) fn single_count(rows: Vec<Row>, entity: &'static str, key: &str) -> Result<usize> {
    let row = Lookup::from_rows(rows).require(entity, key)?;
    Ok(row.count("count")?)
}

pub(crate) fn urls(rows: Vec<Row>) -> Result<Vec<String>> {
    let urls = rows
        .iter()
        .map(|row| row.require("url").map(str::to_string))
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(urls)
}

/// Status queries over the members of a harvesting collection
#[derive(Clone)]
pub struct CollectionTracker {
    store: Store,
    page_size: usize,
}

impl CollectionTracker {
    pub fn new(store: Store, page_size: usize) -> Self {
        Self { store, page_size }
    }

    /// Distinct URLs among the members with `status`; always equal to the
    /// length of `list_urls_by_status`
    pub async fn count_by_status(&self, collection: &str, status: ObjectStatus) -> Result<usize> {
        let rows = self
            .store
            .select(&ReadQuery::CountMembers {
                collection: collection.to_string(),
                status,
            })
            .await?;
        single_count(rows, "member count", collection)
    }

    /// Member objects with `status`. Exceeds `count_by_status` when several
    /// objects share a URL.
    pub async fn count_objects_by_status(&self, collection: &str, status: ObjectStatus) -> Result<usize> {
        let rows = self
            .store
            .select(&ReadQuery::CountMemberObjects {
                collection: collection.to_string(),
                status,
            })
            .await?;
        single_count(rows, "member object count", collection)
    }

    pub async fn has_any_with_status(&self, collection: &str, status: ObjectStatus) -> Result<bool> {
        let answer = self
            .store
            .read(&ReadQuery::AnyMember {
                collection: collection.to_string(),
                status,
            })
            .await?
            .into_boolean()?;
        Ok(answer)
    }

    /// URLs of all members with `status`, ascending
    pub async fn list_urls_by_status(&self, collection: &str, status: ObjectStatus) -> Result<Vec<String>> {
        let total = self.count_by_status(collection, status).await?;
        debug!("Collection {} has {} members with status {:?}", collection, total, status);

        fetch_all_pages(total, self.page_size, |limit, offset| async move {
            let rows = self
                .store
                .select(&ReadQuery::MemberUrls {
                    collection: collection.to_string(),
                    status,
                    limit,
                    offset,
                })
                .await?;
            urls(rows)
        })
        .await
    }
}
