//! Collection target: up to 200 records per sObject Collections call

use async_trait::async_trait;
use bridge_traits::store::Record;
use provider_rest::{RestRequest, MAX_COLLECTION_RECORDS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use super::flat::{object_type_of, sync_up_flat, FlatTransport};
use super::{SyncContext, SyncUpOutcome, TargetOptions};
use crate::composite::{CompositeCorrelator, SubResponse};
use crate::conflict::{MergeMode, RecordModDate};
use crate::error::Result;
use crate::locator::DirtyRecordLocator;
use crate::record::{is_local_id, SyncRecord, SOUP_ENTRY_ID};
use crate::request::RecordRequest;

/// Uploads independent records through sObject Collections.
///
/// Same reconciliation as [`BatchSyncUpTarget`](super::BatchSyncUpTarget);
/// the conflict check reads every server copy of a page with one retrieve
/// call per object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "CollectionDocument")]
pub struct CollectionSyncUpTarget {
    #[serde(flatten)]
    pub options: TargetOptions,
    max_batch_size: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionDocument {
    #[serde(flatten)]
    options: TargetOptions,
    max_batch_size: Option<usize>,
}

impl From<CollectionDocument> for CollectionSyncUpTarget {
    fn from(doc: CollectionDocument) -> Self {
        Self::new(
            doc.options,
            doc.max_batch_size.unwrap_or(MAX_COLLECTION_RECORDS),
        )
    }
}

impl Default for CollectionSyncUpTarget {
    fn default() -> Self {
        Self::new(TargetOptions::default(), MAX_COLLECTION_RECORDS)
    }
}

impl CollectionSyncUpTarget {
    /// `max_batch_size` is clamped to 200.
    pub fn new(options: TargetOptions, max_batch_size: usize) -> Self {
        Self {
            options,
            max_batch_size: max_batch_size.clamp(1, MAX_COLLECTION_RECORDS),
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
impl FlatTransport for CollectionSyncUpTarget {
    async fn send(
        &self,
        ctx: &SyncContext,
        requests: &[(String, RecordRequest)],
    ) -> Result<HashMap<String, SubResponse>> {
        CompositeCorrelator::new(&ctx.client)
            .send_as_collection(false, requests)
            .await
    }

    /// A record absent from the retrieve result is treated as deleted on the
    /// server.
    async fn remote_mod_dates(
        &self,
        ctx: &SyncContext,
        options: &TargetOptions,
        records: &[&Record],
    ) -> Result<HashMap<i64, RecordModDate>> {
        // object type -> [(entry id, server id)]
        let mut by_type: Vec<(String, Vec<(i64, String)>)> = Vec::new();
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
            let entry = (entry_id, id.to_string());
            match by_type.iter_mut().find(|(t, _)| t == object_type) {
                Some((_, group)) => group.push(entry),
                None => by_type.push((object_type.to_string(), vec![entry])),
            }
        }

        let fields = vec![
            options.id_field_name.clone(),
            options.modification_date_field_name.clone(),
        ];
        let mut dates = HashMap::new();

        for (object_type, group) in &by_type {
            for chunk in group.chunks(MAX_COLLECTION_RECORDS) {
                let ids: Vec<String> = chunk.iter().map(|(_, id)| id.clone()).collect();
                let request =
                    RestRequest::collection_retrieve(ctx.client.api_version(), object_type, &ids, &fields)?;
                let rows: Vec<Value> = ctx.client.send_checked(request).await?.json()?;

                let remote: HashMap<&str, Option<String>> = rows
                    .iter()
                    .filter_map(|row| {
                        let id = row.get(&options.id_field_name)?.as_str()?;
                        let modified = row
                            .get(&options.modification_date_field_name)
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        Some((id, modified))
                    })
                    .collect();

                debug!(
                    object_type = %object_type,
                    requested = ids.len(),
                    found = remote.len(),
                    "Fetched server modification dates"
                );

                for (entry_id, id) in chunk {
                    let date = match remote.get(id.as_str()) {
                        Some(modified) => RecordModDate::new(modified.clone(), false),
                        None => RecordModDate::deleted(),
                    };
                    dates.insert(*entry_id, date);
                }
            }
        }

        Ok(dates)
    }
}
