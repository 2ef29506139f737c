//! In-memory record store
//!
//! A [`LocalStore`] that keeps every soup in process memory. Suitable for
//! desktop tools that load their working set on start, and as the store double
//! in tests.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    store::{field_as_key, DirtyParentQuery, LocalStore, Record, TransactionId, LOCAL, SOUP_ENTRY_ID},
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

type Soups = HashMap<String, BTreeMap<i64, Record>>;

#[derive(Default)]
struct StoreState {
    soups: Soups,
    next_entry_id: i64,
    next_transaction_id: u64,
    open: Option<(TransactionId, Soups, i64)>,
}

/// Process-local [`LocalStore`]
///
/// Transactions snapshot the whole store on begin and restore the snapshot on
/// rollback. Only one transaction may be open at a time.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<StoreState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of `store`, in row-id order.
    pub async fn records(&self, store: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .soups
            .get(store)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One row by row id.
    pub async fn get(&self, store: &str, entry_id: i64) -> Option<Record> {
        let state = self.state.lock().await;
        state.soups.get(store)?.get(&entry_id).cloned()
    }

    pub async fn len(&self, store: &str) -> usize {
        let state = self.state.lock().await;
        state.soups.get(store).map(BTreeMap::len).unwrap_or(0)
    }

    pub async fn is_empty(&self, store: &str) -> bool {
        self.len(store).await == 0
    }
}

fn is_dirty(record: &Record) -> bool {
    record.get(LOCAL).and_then(Value::as_bool).unwrap_or(false)
}

/// Numbers sort before text, numbers numerically.
fn compare_keys(a: &(Option<i64>, String), b: &(Option<i64>, String)) -> Ordering {
    match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    }
}

fn paginate(mut keys: Vec<String>, page_index: usize, page_size: usize) -> Vec<String> {
    let mut sortable: Vec<(Option<i64>, String)> = keys
        .drain(..)
        .map(|k| (k.parse::<i64>().ok(), k))
        .collect();
    sortable.sort_by(compare_keys);
    sortable.dedup_by(|a, b| a.1 == b.1);

    sortable
        .into_iter()
        .skip(page_index.saturating_mul(page_size))
        .take(page_size)
        .map(|(_, k)| k)
        .collect()
}

#[async_trait]
impl LocalStore for MemoryRecordStore {
    async fn query_dirty_ids(
        &self,
        store: &str,
        id_field: &str,
        page_index: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let keys = state
            .soups
            .get(store)
            .map(|rows| {
                rows.values()
                    .filter(|r| is_dirty(r))
                    .filter_map(|r| field_as_key(r, id_field))
                    .collect()
            })
            .unwrap_or_default();

        Ok(paginate(keys, page_index, page_size))
    }

    async fn query_dirty_parent_ids(
        &self,
        query: &DirtyParentQuery,
        page_index: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().await;

        let parents_of_dirty_children: HashSet<String> = state
            .soups
            .get(&query.children_store)
            .map(|rows| {
                rows.values()
                    .filter(|r| is_dirty(r))
                    .filter_map(|r| field_as_key(r, &query.child_parent_id_field))
                    .collect()
            })
            .unwrap_or_default();

        let keys = state
            .soups
            .get(&query.parent_store)
            .map(|rows| {
                rows.values()
                    .filter(|parent| {
                        is_dirty(parent)
                            || field_as_key(parent, &query.parent_id_field)
                                .map(|id| parents_of_dirty_children.contains(&id))
                                .unwrap_or(false)
                    })
                    .filter_map(|parent| field_as_key(parent, &query.result_field))
                    .collect()
            })
            .unwrap_or_default();

        Ok(paginate(keys, page_index, page_size))
    }

    async fn retrieve(&self, store: &str, field: &str, values: &[String]) -> Result<Vec<Record>> {
        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        let state = self.state.lock().await;

        Ok(state
            .soups
            .get(store)
            .map(|rows| {
                rows.values()
                    .filter(|r| {
                        field_as_key(r, field)
                            .map(|k| wanted.contains(k.as_str()))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, store: &str, mut record: Record) -> Result<Record> {
        let mut state = self.state.lock().await;

        let entry_id = match record.get(SOUP_ENTRY_ID) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                BridgeError::StoreError(format!("{} is not an integer: {}", SOUP_ENTRY_ID, n))
            })?,
            Some(other) => {
                return Err(BridgeError::StoreError(format!(
                    "{} is not an integer: {}",
                    SOUP_ENTRY_ID, other
                )))
            }
            None => {
                state.next_entry_id += 1;
                let id = state.next_entry_id;
                record.insert(SOUP_ENTRY_ID.to_string(), Value::from(id));
                id
            }
        };
        if entry_id > state.next_entry_id {
            state.next_entry_id = entry_id;
        }

        state
            .soups
            .entry(store.to_string())
            .or_default()
            .insert(entry_id, record.clone());

        Ok(record)
    }

    async fn delete(&self, store: &str, entry_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(rows) = state.soups.get_mut(store) {
            rows.remove(&entry_id);
        }
        Ok(())
    }

    async fn delete_where_id_in(&self, store: &str, field: &str, values: &[String]) -> Result<()> {
        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        let mut state = self.state.lock().await;
        if let Some(rows) = state.soups.get_mut(store) {
            rows.retain(|_, r| {
                !field_as_key(r, field)
                    .map(|k| wanted.contains(k.as_str()))
                    .unwrap_or(false)
            });
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<TransactionId> {
        let mut state = self.state.lock().await;
        if let Some((open, _, _)) = &state.open {
            return Err(BridgeError::StoreError(format!(
                "transaction {} is still open",
                open.0
            )));
        }

        state.next_transaction_id += 1;
        let id = TransactionId(state.next_transaction_id);
        let snapshot = state.soups.clone();
        let next_entry_id = state.next_entry_id;
        state.open = Some((id, snapshot, next_entry_id));
        debug!(transaction = id.0, "Store transaction opened");
        Ok(id)
    }

    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.open.take() {
            Some((open, _, _)) if open == transaction_id => Ok(()),
            other => {
                state.open = other;
                Err(BridgeError::UnknownTransaction(transaction_id.0))
            }
        }
    }

    async fn rollback_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.open.take() {
            Some((open, soups, next_entry_id)) if open == transaction_id => {
                state.soups = soups;
                state.next_entry_id = next_entry_id;
                debug!(transaction = open.0, "Store transaction rolled back");
                Ok(())
            }
            other => {
                state.open = other;
                Err(BridgeError::UnknownTransaction(transaction_id.0))
            }
        }
    }
}
