//! Dirty-record locator
//!
//! Pages through the local store collecting ids of rows that need uploading.

use bridge_traits::store::{DirtyParentQuery, LocalStore};
use std::collections::HashSet;
use tracing::debug;

use crate::error::Result;

enum DirtyQuery<'q> {
    Rows { store: &'q str, id_field: &'q str },
    Parents(&'q DirtyParentQuery),
}

/// Collects dirty ids page by page into an ordered, duplicate-free list.
pub struct DirtyRecordLocator<'a> {
    store: &'a dyn LocalStore,
    page_size: usize,
}

impl<'a> DirtyRecordLocator<'a> {
    pub fn new(store: &'a dyn LocalStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Values of `id_field` over every dirty row of `store`.
    pub async fn dirty_ids(&self, store: &str, id_field: &str) -> Result<Vec<String>> {
        self.collect(DirtyQuery::Rows { store, id_field }).await
    }

    /// Parents that are dirty or have at least one dirty child.
    pub async fn dirty_parent_ids(&self, query: &DirtyParentQuery) -> Result<Vec<String>> {
        self.collect(DirtyQuery::Parents(query)).await
    }

    async fn collect(&self, query: DirtyQuery<'_>) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut page_index = 0;

        loop {
            let page = match &query {
                DirtyQuery::Rows { store, id_field } => {
                    self.store
                        .query_dirty_ids(store, id_field, page_index, self.page_size)
                        .await?
                }
                DirtyQuery::Parents(parents) => {
                    self.store
                        .query_dirty_parent_ids(parents, page_index, self.page_size)
                        .await?
                }
            };

            let page_len = page.len();
            let mut added = 0;
            for id in page {
                if seen.insert(id.clone()) {
                    ids.push(id);
                    added += 1;
                }
            }

            debug!(page_index, page_len, added, "Fetched dirty id page");

            // A short page is the last one; a page with nothing new means the
            // store ignores paging.
            if page_len < self.page_size || added == 0 {
                break;
            }
            page_index += 1;
        }

        Ok(ids)
    }
}
