//! Record flags and identity helpers
//!
//! A record is dirty when [`LOCAL`] is `true`; [`LOCAL`] always equals the
//! OR of the three per-operation flags.

use bridge_traits::store::Record;
use serde_json::Value;

pub use bridge_traits::store::{LOCAL, SOUP_ENTRY_ID};

pub const LOCALLY_CREATED: &str = "__locally_created__";
pub const LOCALLY_UPDATED: &str = "__locally_updated__";
pub const LOCALLY_DELETED: &str = "__locally_deleted__";
pub const LAST_ERROR: &str = "__last_error__";
pub const SYNC_ID: &str = "__sync_id__";
pub const ATTRIBUTES: &str = "attributes";
pub const TYPE: &str = "type";

/// Prefix of placeholder ids handed out before the server assigns one
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Placeholder id for a row that has never reached the server.
pub fn local_id_for(entry_id: i64) -> String {
    format!("{}{}", LOCAL_ID_PREFIX, entry_id)
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Flag and identity accessors on stored records.
pub trait SyncRecord {
    fn flag(&self, name: &str) -> bool;

    fn is_locally_created(&self) -> bool {
        self.flag(LOCALLY_CREATED)
    }

    fn is_locally_updated(&self) -> bool {
        self.flag(LOCALLY_UPDATED)
    }

    fn is_locally_deleted(&self) -> bool {
        self.flag(LOCALLY_DELETED)
    }

    fn is_dirty(&self) -> bool {
        self.flag(LOCAL)
    }

    /// Store row id, if assigned.
    fn entry_id(&self) -> Option<i64>;

    /// Non-empty string value of `field`.
    fn string_field(&self, field: &str) -> Option<&str>;

    /// `attributes.type`
    fn object_type(&self) -> Option<&str>;

    /// Set the three flags and recompute [`LOCAL`].
    fn set_flags(&mut self, created: bool, updated: bool, deleted: bool);

    /// Clear every flag and the last error.
    fn mark_clean(&mut self);

    fn set_last_error(&mut self, error: impl Into<String>);
}

impl SyncRecord for Record {
    fn flag(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    fn entry_id(&self) -> Option<i64> {
        match self.get(SOUP_ENTRY_ID)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn string_field(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn object_type(&self) -> Option<&str> {
        self.get(ATTRIBUTES)?
            .get(TYPE)?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    fn set_flags(&mut self, created: bool, updated: bool, deleted: bool) {
        self.insert(LOCALLY_CREATED.to_string(), Value::Bool(created));
        self.insert(LOCALLY_UPDATED.to_string(), Value::Bool(updated));
        self.insert(LOCALLY_DELETED.to_string(), Value::Bool(deleted));
        self.insert(LOCAL.to_string(), Value::Bool(created || updated || deleted));
    }

    fn mark_clean(&mut self) {
        self.set_flags(false, false, false);
        self.remove(LAST_ERROR);
    }

    fn set_last_error(&mut self, error: impl Into<String>) {
        self.insert(LAST_ERROR.to_string(), Value::String(error.into()));
    }
}
