//! Batch target: up to 25 records per composite call

use async_trait::async_trait;
use bridge_traits::store::Record;
use provider_rest::{RestRequest, MAX_COMPOSITE_SUBREQUESTS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::flat::{object_type_of, sync_up_flat, FlatTransport};
use super::{SyncContext, SyncUpOutcome, TargetOptions};
use crate::composite::{CompositeCorrelator, SubResponse};
use crate::conflict::{MergeMode, RecordModDate};
use crate::error::Result;
use crate::locator::DirtyRecordLocator;
use crate::record::{is_local_id, SyncRecord, SOUP_ENTRY_ID};
use crate::request::RecordRequest;

/// Uploads independent records through the composite resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "BatchDocument")]
pub struct BatchSyncUpTarget {
    #[serde(flatten)]
    pub options: TargetOptions,
    max_batch_size: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchDocument {
    #[serde(flatten)]
    options: TargetOptions,
    max_batch_size: Option<usize>,
}

impl From<BatchDocument> for BatchSyncUpTarget {
    fn from(doc: BatchDocument) -> Self {
        Self::new(
            doc.options,
            doc.max_batch_size.unwrap_or(MAX_COMPOSITE_SUBREQUESTS),
        )
    }
}

impl Default for BatchSyncUpTarget {
    fn default() -> Self {
        Self::new(TargetOptions::default(), MAX_COMPOSITE_SUBREQUESTS)
    }
}

impl BatchSyncUpTarget {
    /// `max_batch_size` is clamped to 25.
    pub fn new(options: TargetOptions, max_batch_size: usize) -> Self {
        Self {
            options,
            max_batch_size: max_batch_size.clamp(1, MAX_COMPOSITE_SUBREQUESTS),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub async fn dirty_record_ids(&self, ctx: &SyncContext) -> Result<Vec<String>> {
        DirtyRecordLocator::new(ctx.store.as_ref(), ctx.page_size)
            .dirty_ids(&ctx.soup_name, SOUP_ENTRY_ID)
            .await
    }

    pub async fn sync_up_records(
        &self,
        ctx: &SyncContext,
        records: Vec<Record>,
        fieldlist: &[String],
        merge_mode: MergeMode,
    ) -> Result<SyncUpOutcome> {
        sync_up_flat(
            ctx,
            &self.options,
            self.max_batch_size,
            self,
            records,
            fieldlist,
            merge_mode,
        )
        .await
    }
}

#[async_trait]
impl FlatTransport for BatchSyncUpTarget {
    async fn send(
        &self,
        ctx: &SyncContext,
        requests: &[(String, RecordRequest)],
    ) -> Result<HashMap<String, SubResponse>> {
        CompositeCorrelator::new(&ctx.client)
            .send(false, requests)
            .await
    }

    /// One retrieve per record, asking only for the modification date.
    async fn remote_mod_dates(
        &self,
        ctx: &SyncContext,
        options: &TargetOptions,
        records: &[&Record],
    ) -> Result<HashMap<i64, RecordModDate>> {
        let fields = vec![options.modification_date_field_name.clone()];
        let mut dates = HashMap::new();

        for record in records {
            let (Some(entry_id), Some(id), Some(object_type)) = (
                record.entry_id(),
                record.string_field(&options.id_field_name),
                object_type_of(record, options),
            ) else {
                continue;
            };
            if is_local_id(id) {
                continue;
            }

            let request = RestRequest::retrieve(ctx.client.api_version(), object_type, id, &fields);
            let response = ctx.client.send(request).await?;
            let remote = if response.is_not_found() {
                RecordModDate::deleted()
            } else {
                let body: Value = response.error_for_status()?.as_value()?;
                RecordModDate::new(
                    body.get(&options.modification_date_field_name)
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    false,
                )
            };
            dates.insert(entry_id, remote);
        }

        Ok(dates)
    }
}
