//! Upload pass shared by the batch and collection targets
//!
//! Records are independent of each other. One pass builds a request per dirty
//! record, sends them in one go, and reconciles every record against its
//! sub-response inside a single store transaction. A record whose update or
//! delete came back 404 under [`MergeMode::Overwrite`] is flipped to
//! locally-created and sent again in a second pass; there is never a third.
//! The second pass carries only the flipped records. Every other record of
//! the page was settled by the first pass and is not sent again.

use async_trait::async_trait;
use bridge_traits::store::Record;
use core_runtime::events::RecordEvent;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use super::{SyncContext, SyncUpOutcome, TargetOptions};
use crate::composite::{extract_server_ids, SubResponse, NOT_ATTEMPTED};
use crate::conflict::{is_newer_than_server, MergeMode, RecordModDate};
use crate::error::{Result, SyncError};
use crate::record::{local_id_for, SyncRecord, SOUP_ENTRY_ID, SYNC_ID};
use crate::request::RecordRequest;

/// How a flat target talks to the server
#[async_trait]
pub(super) trait FlatTransport: Send + Sync {
    /// Send the requests, answering by reference id.
    async fn send(
        &self,
        ctx: &SyncContext,
        requests: &[(String, RecordRequest)],
    ) -> Result<HashMap<String, SubResponse>>;

    /// Server-side modification state of `records`, keyed by `_soupEntryId`.
    ///
    /// Records left out of the result are treated as newer than the server.
    async fn remote_mod_dates(
        &self,
        ctx: &SyncContext,
        options: &TargetOptions,
        records: &[&Record],
    ) -> Result<HashMap<i64, RecordModDate>>;
}

/// Modification state of the local copy.
pub(super) fn local_mod_date(record: &Record, options: &TargetOptions) -> RecordModDate {
    RecordModDate::new(
        record
            .string_field(&options.modification_date_field_name)
            .map(str::to_string),
        record.is_locally_deleted(),
    )
}

/// Object type of a record, falling back to the configured one.
pub(super) fn object_type_of<'r>(record: &'r Record, options: &'r TargetOptions) -> Option<&'r str> {
    record.object_type().or(options.object_type.as_deref())
}

#[instrument(skip_all, fields(soup = %ctx.soup_name, count = records.len()))]
pub(super) async fn sync_up_flat(
    ctx: &SyncContext,
    options: &TargetOptions,
    max_batch_size: usize,
    transport: &dyn FlatTransport,
    records: Vec<Record>,
    fieldlist: &[String],
    merge_mode: MergeMode,
) -> Result<SyncUpOutcome> {
    if records.len() > max_batch_size {
        return Err(SyncError::BatchTooLarge {
            size: records.len(),
            max: max_batch_size,
        });
    }

    let mut outcome = SyncUpOutcome::default();
    let mut pending = Vec::with_capacity(records.len());
    for mut record in records.into_iter().filter(|r| r.is_dirty()) {
        ensure_id(&mut record, &options.id_field_name)?;
        pending.push(record);
    }

    if merge_mode == MergeMode::LeaveIfChanged && !pending.is_empty() {
        pending = skip_conflicts(ctx, options, transport, pending, &mut outcome).await?;
    }

    let builder = options.request_builder();
    let mut is_rerun = false;

    while !pending.is_empty() {
        let mut requests = Vec::new();
        let mut build_errors = HashMap::new();
        for record in &pending {
            let reference_id = reference_id(record, &options.id_field_name)?;
            match builder.build_request(record, fieldlist, options.object_type.as_deref()) {
                Ok(Some(request)) => requests.push((reference_id, request)),
                Ok(None) => {}
                Err(e) => {
                    build_errors.insert(reference_id, e.to_string());
                }
            }
        }

        let responses = if requests.is_empty() {
            HashMap::new()
        } else {
            transport.send(ctx, &requests).await?
        };
        let id_map = extract_server_ids(&responses);

        let pass = Pass {
            ctx,
            options,
            merge_mode,
            is_rerun,
            responses: &responses,
            id_map: &id_map,
            build_errors: &build_errors,
        };
        let (pass_outcome, rerun, events) = pass.reconcile_in_transaction(pending).await?;

        debug!(
            is_rerun,
            uploaded = pass_outcome.uploaded,
            removed = pass_outcome.removed,
            failed = pass_outcome.failed,
            rerun = rerun.len(),
            "Reconciled pass"
        );

        outcome.merge(pass_outcome);
        ctx.emit_all(events);

        if is_rerun {
            break;
        }
        pending = rerun;
        is_rerun = true;
    }

    Ok(outcome)
}

/// Give records that never reached the server a placeholder id.
pub(super) fn ensure_id(record: &mut Record, id_field: &str) -> Result<()> {
    if record.string_field(id_field).is_some() {
        return Ok(());
    }
    let entry_id = record
        .entry_id()
        .ok_or_else(|| SyncError::MissingField(SOUP_ENTRY_ID.to_string()))?;
    record.insert(id_field.to_string(), Value::String(local_id_for(entry_id)));
    Ok(())
}

pub(super) fn reference_id(record: &Record, id_field: &str) -> Result<String> {
    record
        .string_field(id_field)
        .map(str::to_string)
        .ok_or_else(|| SyncError::MissingField(id_field.to_string()))
}

async fn skip_conflicts(
    ctx: &SyncContext,
    options: &TargetOptions,
    transport: &dyn FlatTransport,
    pending: Vec<Record>,
    outcome: &mut SyncUpOutcome,
) -> Result<Vec<Record>> {
    let to_check: Vec<&Record> = pending
        .iter()
        .filter(|r| !r.is_locally_created())
        .collect();
    if to_check.is_empty() {
        return Ok(pending);
    }

    let remote = transport.remote_mod_dates(ctx, options, &to_check).await?;

    let mut kept = Vec::with_capacity(pending.len());
    for record in pending {
        let newer = match record.entry_id().and_then(|id| remote.get(&id)) {
            Some(remote_date) if !record.is_locally_created() => {
                is_newer_than_server(&local_mod_date(&record, options), remote_date)
            }
            _ => true,
        };

        if newer {
            kept.push(record);
        } else {
            let record_id = record
                .string_field(&options.id_field_name)
                .unwrap_or_default()
                .to_string();
            info!(record_id = %record_id, "Server copy changed, leaving record as is");
            outcome.conflicts += 1;
            ctx.emit(RecordEvent::Conflict {
                store: ctx.soup_name.clone(),
                record_id,
            });
        }
    }
    Ok(kept)
}

struct Pass<'a> {
    ctx: &'a SyncContext,
    options: &'a TargetOptions,
    merge_mode: MergeMode,
    is_rerun: bool,
    responses: &'a HashMap<String, SubResponse>,
    id_map: &'a HashMap<String, String>,
    build_errors: &'a HashMap<String, String>,
}

type PassResult = (SyncUpOutcome, Vec<Record>, Vec<RecordEvent>);

impl Pass<'_> {
    async fn reconcile_in_transaction(&self, records: Vec<Record>) -> Result<PassResult> {
        let store = &self.ctx.store;
        let transaction = store.begin_transaction().await?;

        match self.reconcile(records).await {
            Ok(result) => {
                store.commit_transaction(transaction).await?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = store.rollback_transaction(transaction).await {
                    warn!(error = %rollback_err, "Rollback after failed reconciliation failed");
                }
                Err(e)
            }
        }
    }

    async fn reconcile(&self, records: Vec<Record>) -> Result<PassResult> {
        let store = &self.ctx.store;
        let soup = self.ctx.soup_name.as_str();
        let id_field = self.options.id_field_name.as_str();

        let mut outcome = SyncUpOutcome::default();
        let mut rerun = Vec::new();
        let mut events = Vec::new();

        for mut record in records {
            let entry_id = record
                .entry_id()
                .ok_or_else(|| SyncError::MissingField(SOUP_ENTRY_ID.to_string()))?;
            let reference_id = reference_id(&record, id_field)?;

            if let Some(error) = self.build_errors.get(&reference_id) {
                record.set_last_error(error.clone());
                store.upsert(soup, record).await?;
                outcome.failed += 1;
                events.push(RecordEvent::Failed {
                    store: soup.to_string(),
                    record_id: reference_id,
                    status: NOT_ATTEMPTED,
                });
                continue;
            }

            let response = self
                .responses
                .get(&reference_id)
                .cloned()
                .unwrap_or_else(|| SubResponse::not_attempted(reference_id.as_str()));

            if record.is_locally_deleted() {
                if record.is_locally_created() || response.is_success() || response.is_not_found()
                {
                    store.delete(soup, entry_id).await?;
                    outcome.removed += 1;
                    events.push(RecordEvent::Removed {
                        store: soup.to_string(),
                        record_id: reference_id,
                    });
                } else {
                    events.push(self.fail(&mut record, &reference_id, &response));
                    store.upsert(soup, record).await?;
                    outcome.failed += 1;
                }
                continue;
            }

            if response.is_success() {
                let server_id = self.id_map.get(&reference_id).cloned().or_else(|| {
                    record
                        .is_locally_created()
                        .then(|| response.body_id().map(str::to_string))
                        .flatten()
                });
                let record_id = server_id.clone().unwrap_or_else(|| reference_id.clone());
                if let Some(id) = server_id {
                    record.insert(id_field.to_string(), Value::String(id));
                }
                record.mark_clean();
                if let Some(sync_id) = self.ctx.sync_id {
                    record.insert(SYNC_ID.to_string(), Value::from(sync_id));
                }
                store.upsert(soup, record).await?;
                outcome.uploaded += 1;
                events.push(RecordEvent::Uploaded {
                    store: soup.to_string(),
                    record_id,
                });
            } else if response.is_not_found()
                && self.merge_mode == MergeMode::Overwrite
                && !self.is_rerun
            {
                debug!(record_id = %reference_id, "Server copy gone, recreating");
                let updated = record.is_locally_updated();
                record.set_flags(true, updated, false);
                let stored = store.upsert(soup, record).await?;
                rerun.push(stored);
            } else {
                events.push(self.fail(&mut record, &reference_id, &response));
                store.upsert(soup, record).await?;
                outcome.failed += 1;
            }
        }

        Ok((outcome, rerun, events))
    }

    fn fail(&self, record: &mut Record, reference_id: &str, response: &SubResponse) -> RecordEvent {
        warn!(
            record_id = %reference_id,
            status = response.http_status_code,
            "Server rejected record"
        );
        record.set_last_error(response.error_text());
        RecordEvent::Failed {
            store: self.ctx.soup_name.clone(),
            record_id: reference_id.to_string(),
            status: response.http_status_code,
        }
    }
}
