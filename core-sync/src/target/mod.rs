//! Sync-up targets
//!
//! A target decides how dirty records reach the server:
//!
//! - [`BatchSyncUpTarget`]: up to 25 records per composite call
//! - [`CollectionSyncUpTarget`]: up to 200 records per sObject Collections call
//! - [`ParentChildrenSyncUpTarget`]: one parent and its children per composite call
//!
//! Targets persist as JSON documents tagged by `type`
//! (`batch`, `collection`, `parentChildren`). Batch sizes are clamped to the
//! strategy ceiling both on construction and when a document is read back.

mod batch;
mod collection;
mod flat;
mod parent_children;

pub use batch::BatchSyncUpTarget;
pub use collection::CollectionSyncUpTarget;
pub use parent_children::{
    ChildrenInfo, ParentChildrenSyncUpTarget, ParentInfo, RelationshipType,
};

use bridge_traits::store::{LocalStore, Record};
use core_runtime::events::{CoreEvent, EventBus, RecordEvent};
use provider_rest::RestClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::conflict::MergeMode;
use crate::error::{Result, SyncError};
use crate::request::RequestBuilder;

pub const DEFAULT_ID_FIELD: &str = "Id";
pub const DEFAULT_MODIFICATION_DATE_FIELD: &str = "LastModifiedDate";

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_modification_date_field() -> String {
    DEFAULT_MODIFICATION_DATE_FIELD.to_string()
}

/// Field names and overrides shared by the flat targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOptions {
    #[serde(default = "default_id_field")]
    pub id_field_name: String,
    #[serde(default = "default_modification_date_field")]
    pub modification_date_field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_fieldlist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_fieldlist: Option<Vec<String>>,
    /// Used when a record carries no `attributes.type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            id_field_name: default_id_field(),
            modification_date_field_name: default_modification_date_field(),
            external_id_field_name: None,
            create_fieldlist: None,
            update_fieldlist: None,
            object_type: None,
        }
    }
}

impl TargetOptions {
    pub fn request_builder(&self) -> RequestBuilder {
        RequestBuilder::new(&self.id_field_name, &self.modification_date_field_name)
            .with_external_id_field(self.external_id_field_name.clone())
            .with_fieldlists(self.create_fieldlist.clone(), self.update_fieldlist.clone())
    }
}

/// Collaborators for one sync-up pass
#[derive(Clone)]
pub struct SyncContext {
    pub client: RestClient,
    pub store: Arc<dyn LocalStore>,
    /// Local store location holding the records being uploaded
    pub soup_name: String,
    pub sync_id: Option<i64>,
    pub page_size: usize,
    events: Option<EventBus>,
}

impl SyncContext {
    pub fn new(client: RestClient, store: Arc<dyn LocalStore>, soup_name: impl Into<String>) -> Self {
        Self {
            client,
            store,
            soup_name: soup_name.into(),
            sync_id: None,
            page_size: core_runtime::config::DEFAULT_PAGE_SIZE,
            events: None,
        }
    }

    pub fn with_sync_id(mut self, sync_id: i64) -> Self {
        self.sync_id = Some(sync_id);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) fn emit(&self, event: RecordEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.emit(CoreEvent::Record(event));
        }
    }

    pub(crate) fn emit_all(&self, events: Vec<RecordEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Counts for one or more passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncUpOutcome {
    /// Created or updated on the server and cleaned locally
    pub uploaded: u64,
    /// Removed from the local store
    pub removed: u64,
    /// Left dirty with `__last_error__` set
    pub failed: u64,
    /// Skipped because the server copy changed
    pub conflicts: u64,
}

impl SyncUpOutcome {
    pub fn merge(&mut self, other: SyncUpOutcome) {
        self.uploaded += other.uploaded;
        self.removed += other.removed;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
    }
}

/// One of the three upload strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncUpTarget {
    #[serde(rename = "batch")]
    Batch(BatchSyncUpTarget),
    #[serde(rename = "collection")]
    Collection(CollectionSyncUpTarget),
    #[serde(rename = "parentChildren")]
    ParentChildren(ParentChildrenSyncUpTarget),
}

impl SyncUpTarget {
    /// Strategy name as written in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Batch(_) => "batch",
            Self::Collection(_) => "collection",
            Self::ParentChildren(_) => "parentChildren",
        }
    }

    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::Batch(target) => target.max_batch_size(),
            Self::Collection(target) => target.max_batch_size(),
            Self::ParentChildren(target) => target.max_batch_size(),
        }
    }

    /// Store location the dirty ids are read from, when the target fixes it.
    pub fn soup_name(&self) -> Option<&str> {
        match self {
            Self::ParentChildren(target) => Some(&target.parent.soup_name),
            Self::Batch(_) | Self::Collection(_) => None,
        }
    }

    /// `_soupEntryId` of every record (or parent) that needs uploading.
    pub async fn dirty_record_ids(&self, ctx: &SyncContext) -> Result<Vec<String>> {
        match self {
            Self::Batch(target) => target.dirty_record_ids(ctx).await,
            Self::Collection(target) => target.dirty_record_ids(ctx).await,
            Self::ParentChildren(target) => target.dirty_record_ids(ctx).await,
        }
    }

    /// Upload one page of records.
    ///
    /// # Errors
    ///
    /// [`SyncError::BatchTooLarge`] when `records` exceeds
    /// [`max_batch_size`](Self::max_batch_size); transport and store failures.
    /// Per-record server rejections are recorded on the records instead.
    pub async fn sync_up_records(
        &self,
        ctx: &SyncContext,
        records: Vec<Record>,
        fieldlist: &[String],
        merge_mode: MergeMode,
    ) -> Result<SyncUpOutcome> {
        match self {
            Self::Batch(target) => target.sync_up_records(ctx, records, fieldlist, merge_mode).await,
            Self::Collection(target) => {
                target.sync_up_records(ctx, records, fieldlist, merge_mode).await
            }
            Self::ParentChildren(target) => {
                target.sync_up_records(ctx, records, fieldlist, merge_mode).await
            }
        }
    }

    /// Read a target document, clamping its batch size.
    pub fn from_json(document: &Value) -> Result<Self> {
        serde_json::from_value(document.clone())
            .map_err(|e| SyncError::InvalidTarget(e.to_string()))
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl From<BatchSyncUpTarget> for SyncUpTarget {
    fn from(target: BatchSyncUpTarget) -> Self {
        Self::Batch(target)
    }
}

impl From<CollectionSyncUpTarget> for SyncUpTarget {
    fn from(target: CollectionSyncUpTarget) -> Self {
        Self::Collection(target)
    }
}

impl From<ParentChildrenSyncUpTarget> for SyncUpTarget {
    fn from(target: ParentChildrenSyncUpTarget) -> Self {
        Self::ParentChildren(target)
    }
}
