//! Local Record Store Abstraction
//!
//! The sync engine reads and rewrites records held in a host-owned store
//! ("soups" of JSON documents). Storage engine and query execution stay on the
//! host side; this trait is the whole surface the engine relies on.
//!
//! ## Row identity
//!
//! Every stored record carries a store-assigned row id under
//! [`SOUP_ENTRY_ID`]. [`LocalStore::upsert`] inserts when the field is absent
//! and replaces the row otherwise.
//!
//! ## Dirty rows
//!
//! A row is dirty when its [`LOCAL`] flag is `true`.
//!
//! ## Transactions
//!
//! `begin_transaction` / `commit_transaction` / `rollback_transaction` bracket
//! a group of writes. The engine opens at most one transaction at a time.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// A stored record: a JSON object
pub type Record = Map<String, Value>;

/// Store-assigned row id
pub const SOUP_ENTRY_ID: &str = "_soupEntryId";

/// Dirty flag, OR of the created/updated/deleted flags
pub const LOCAL: &str = "__local__";

/// Identifier of an open store transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub u64);

/// Parent/children join used to find parents that need uploading.
///
/// A parent qualifies when it is dirty itself or at least one child whose
/// `child_parent_id_field` equals the parent's `parent_id_field` is dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyParentQuery {
    pub parent_store: String,
    pub parent_id_field: String,
    pub children_store: String,
    pub child_parent_id_field: String,
    /// Parent field whose values are returned
    pub result_field: String,
}

/// Stringified field value used for id comparisons.
///
/// Strings compare as-is, integers through their decimal form. Other JSON
/// types never match.
pub fn field_as_key(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// One page of values of `id_field` over dirty rows, ascending.
    ///
    /// Pages are zero-based. A page shorter than `page_size` is the last one.
    async fn query_dirty_ids(
        &self,
        store: &str,
        id_field: &str,
        page_index: usize,
        page_size: usize,
    ) -> Result<Vec<String>>;

    /// One page of parents selected by [`DirtyParentQuery`], ascending.
    async fn query_dirty_parent_ids(
        &self,
        query: &DirtyParentQuery,
        page_index: usize,
        page_size: usize,
    ) -> Result<Vec<String>>;

    /// Rows whose `field` matches any of `values`, in row-id order.
    async fn retrieve(&self, store: &str, field: &str, values: &[String]) -> Result<Vec<Record>>;

    /// Insert or replace a row, returning the stored form.
    async fn upsert(&self, store: &str, record: Record) -> Result<Record>;

    /// Remove one row by row id. Removing an unknown row is not an error.
    async fn delete(&self, store: &str, entry_id: i64) -> Result<()>;

    /// Remove every row whose `field` matches any of `values`.
    async fn delete_where_id_in(&self, store: &str, field: &str, values: &[String]) -> Result<()>;

    async fn begin_transaction(&self) -> Result<TransactionId>;

    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()>;

    /// Undo every write made since the matching `begin_transaction`.
    async fn rollback_transaction(&self, transaction_id: TransactionId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_as_key() {
        let record = json!({"Id": "001", "_soupEntryId": 42, "flag": true})
            .as_object()
            .cloned()
            .unwrap();

        assert_eq!(field_as_key(&record, "Id"), Some("001".to_string()));
        assert_eq!(field_as_key(&record, SOUP_ENTRY_ID), Some("42".to_string()));
        assert_eq!(field_as_key(&record, "flag"), None);
        assert_eq!(field_as_key(&record, "missing"), None);
    }
}
