//! Parent/children target
//!
//! Uploads one parent together with its children in a single composite call.
//! Children of a parent being created reference it through `@{parentRef.id}`,
//! so the whole tree lands in one round trip. Reference ids carry a `parent_`
//! or `child_` prefix since both stores may hand out the same entry ids.

use bridge_traits::store::{DirtyParentQuery, Record};
use core_runtime::events::RecordEvent;
use provider_rest::SoqlBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use super::flat::{ensure_id, reference_id};
use super::{default_id_field, default_modification_date_field, SyncContext, SyncUpOutcome};
use crate::composite::{
    extract_server_ids, reference_to_id, CompositeCorrelator, SubResponse, NOT_ATTEMPTED,
};
use crate::conflict::{is_newer_than_server, MergeMode, RecordModDate};
use crate::error::{Result, SyncError};
use crate::locator::DirtyRecordLocator;
use crate::record::{is_local_id, SyncRecord, SOUP_ENTRY_ID, SYNC_ID};
use crate::request::{RecordRequest, RequestBuilder};

const ENTITY_IS_DELETED: &str = "ENTITY_IS_DELETED";

/// How children depend on their parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Children cannot outlive the parent
    MasterDetail,
    Lookup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentInfo {
    pub sobject_type: String,
    pub soup_name: String,
    #[serde(default = "default_id_field")]
    pub id_field_name: String,
    #[serde(default = "default_modification_date_field")]
    pub modification_date_field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenInfo {
    pub sobject_type: String,
    /// Relationship name used in the parent query subselect
    pub sobject_type_plural: String,
    pub soup_name: String,
    /// Child field holding the parent id
    pub parent_id_field_name: String,
    #[serde(default = "default_id_field")]
    pub id_field_name: String,
    #[serde(default = "default_modification_date_field")]
    pub modification_date_field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentChildrenSyncUpTarget {
    pub parent: ParentInfo,
    pub children: ChildrenInfo,
    pub relationship_type: RelationshipType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_fieldlist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_fieldlist: Option<Vec<String>>,
    #[serde(default)]
    pub children_create_fieldlist: Vec<String>,
    #[serde(default)]
    pub children_update_fieldlist: Vec<String>,
}

fn mod_date(record: &Record, field: &str) -> RecordModDate {
    RecordModDate::new(
        record.string_field(field).map(str::to_string),
        record.is_locally_deleted(),
    )
}

/// What happened to the tree in one pass
struct TreePass {
    outcome: SyncUpOutcome,
    events: Vec<RecordEvent>,
    needs_rerun: bool,
}

impl ParentChildrenSyncUpTarget {
    pub fn new(parent: ParentInfo, children: ChildrenInfo, relationship_type: RelationshipType) -> Self {
        Self {
            parent,
            children,
            relationship_type,
            create_fieldlist: None,
            update_fieldlist: None,
            children_create_fieldlist: Vec::new(),
            children_update_fieldlist: Vec::new(),
        }
    }

    pub fn with_children_fieldlists(
        mut self,
        create_fieldlist: Vec<String>,
        update_fieldlist: Vec<String>,
    ) -> Self {
        self.children_create_fieldlist = create_fieldlist;
        self.children_update_fieldlist = update_fieldlist;
        self
    }

    /// Always one parent per call.
    pub fn max_batch_size(&self) -> usize {
        1
    }

    fn is_master_detail(&self) -> bool {
        self.relationship_type == RelationshipType::MasterDetail
    }

    fn parent_builder(&self) -> RequestBuilder {
        RequestBuilder::new(&self.parent.id_field_name, &self.parent.modification_date_field_name)
            .with_external_id_field(self.parent.external_id_field_name.clone())
            .with_fieldlists(self.create_fieldlist.clone(), self.update_fieldlist.clone())
    }

    fn child_builder(&self) -> RequestBuilder {
        RequestBuilder::new(&self.children.id_field_name, &self.children.modification_date_field_name)
            .with_external_id_field(self.children.external_id_field_name.clone())
            .with_fieldlists(
                Some(self.children_create_fieldlist.clone()),
                Some(self.children_update_fieldlist.clone()),
            )
    }

    /// Parents that are dirty or have a dirty child.
    pub async fn dirty_record_ids(&self, ctx: &SyncContext) -> Result<Vec<String>> {
        let query = DirtyParentQuery {
            parent_store: self.parent.soup_name.clone(),
            parent_id_field: self.parent.id_field_name.clone(),
            children_store: self.children.soup_name.clone(),
            child_parent_id_field: self.children.parent_id_field_name.clone(),
            result_field: SOUP_ENTRY_ID.to_string(),
        };
        DirtyRecordLocator::new(ctx.store.as_ref(), ctx.page_size)
            .dirty_parent_ids(&query)
            .await
    }

    pub async fn sync_up_records(
        &self,
        ctx: &SyncContext,
        records: Vec<Record>,
        fieldlist: &[String],
        merge_mode: MergeMode,
    ) -> Result<SyncUpOutcome> {
        if records.len() > self.max_batch_size() {
            return Err(SyncError::BatchTooLarge {
                size: records.len(),
                max: self.max_batch_size(),
            });
        }
        match records.into_iter().next() {
            Some(parent) => self.sync_up_tree(ctx, parent, fieldlist, merge_mode).await,
            None => Ok(SyncUpOutcome::default()),
        }
    }

    async fn load_children(&self, ctx: &SyncContext, parent_id: &str) -> Result<Vec<Record>> {
        Ok(ctx
            .store
            .retrieve(
                &self.children.soup_name,
                &self.children.parent_id_field_name,
                &[parent_id.to_string()],
            )
            .await?)
    }

    #[instrument(skip_all, fields(parent_type = %self.parent.sobject_type))]
    async fn sync_up_tree(
        &self,
        ctx: &SyncContext,
        mut parent: Record,
        fieldlist: &[String],
        merge_mode: MergeMode,
    ) -> Result<SyncUpOutcome> {
        ensure_id(&mut parent, &self.parent.id_field_name)?;
        let entry_id = parent
            .entry_id()
            .ok_or_else(|| SyncError::MissingField(SOUP_ENTRY_ID.to_string()))?;
        let parent_id = reference_id(&parent, &self.parent.id_field_name)?;
        let mut children = self.load_children(ctx, &parent_id).await?;

        let dirty_children = children.iter().filter(|c| c.is_dirty()).count() as u64;
        let mut outcome = SyncUpOutcome::default();
        if !parent.is_dirty() && dirty_children == 0 {
            return Ok(outcome);
        }

        if merge_mode == MergeMode::LeaveIfChanged
            && !self.is_newer_than_server(ctx, &parent, &children).await?
        {
            info!(parent_id = %parent_id, "Server copy of the tree changed, leaving it as is");
            outcome.conflicts += u64::from(parent.is_dirty()) + dirty_children;
            ctx.emit(RecordEvent::Conflict {
                store: self.parent.soup_name.clone(),
                record_id: parent_id,
            });
            return Ok(outcome);
        }

        let mut is_rerun = false;
        loop {
            let pass = self
                .run_pass(ctx, parent, children, fieldlist, merge_mode, is_rerun)
                .await?;
            outcome.merge(pass.outcome);
            ctx.emit_all(pass.events);

            if !pass.needs_rerun || is_rerun {
                break;
            }
            is_rerun = true;

            parent = match ctx
                .store
                .retrieve(&self.parent.soup_name, SOUP_ENTRY_ID, &[entry_id.to_string()])
                .await?
                .into_iter()
                .next()
            {
                Some(parent) => parent,
                None => break,
            };
            let parent_id = reference_id(&parent, &self.parent.id_field_name)?;
            children = self.load_children(ctx, &parent_id).await?;
        }

        Ok(outcome)
    }

    /// Every row of the tree, dirty or not, must be at least as new as its
    /// server copy. Rows missing on the server, or without a server
    /// timestamp, count as newer.
    async fn is_newer_than_server(
        &self,
        ctx: &SyncContext,
        parent: &Record,
        children: &[Record],
    ) -> Result<bool> {
        if parent.is_locally_created() {
            return Ok(true);
        }
        let parent_id = match parent.string_field(&self.parent.id_field_name) {
            Some(id) if !is_local_id(id) => id.to_string(),
            _ => return Ok(true),
        };

        let children_query = SoqlBuilder::new(&self.children.sobject_type_plural)
            .select([
                self.children.id_field_name.as_str(),
                self.children.modification_date_field_name.as_str(),
            ])
            .build();
        let soql = SoqlBuilder::new(&self.parent.sobject_type)
            .select([
                self.parent.id_field_name.as_str(),
                self.parent.modification_date_field_name.as_str(),
            ])
            .select_subquery(children_query)
            .where_in(&self.parent.id_field_name, &[parent_id])
            .build();

        let rows = ctx.client.query_all(&soql).await?;
        let row = match rows.first() {
            Some(row) => row,
            None => return Ok(true),
        };

        let remote_parent = row
            .get(&self.parent.modification_date_field_name)
            .and_then(Value::as_str);
        if let Some(remote) = remote_parent {
            let local = mod_date(parent, &self.parent.modification_date_field_name);
            if !is_newer_than_server(&local, &RecordModDate::new(Some(remote.to_string()), false)) {
                return Ok(false);
            }
        }

        let remote_children: HashMap<&str, &str> = row
            .get(&self.children.sobject_type_plural)
            .and_then(|rel| rel.get("records"))
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|child| {
                        let id = child.get(&self.children.id_field_name)?.as_str()?;
                        let modified = child
                            .get(&self.children.modification_date_field_name)?
                            .as_str()?;
                        Some((id, modified))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for child in children.iter().filter(|c| !c.is_locally_created()) {
            let Some(remote) = child
                .string_field(&self.children.id_field_name)
                .and_then(|id| remote_children.get(id))
            else {
                continue;
            };
            let local = mod_date(child, &self.children.modification_date_field_name);
            if !is_newer_than_server(&local, &RecordModDate::new(Some(remote.to_string()), false)) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn run_pass(
        &self,
        ctx: &SyncContext,
        mut parent: Record,
        mut children: Vec<Record>,
        fieldlist: &[String],
        merge_mode: MergeMode,
        is_rerun: bool,
    ) -> Result<TreePass> {
        let parent_id = reference_id(&parent, &self.parent.id_field_name)?;
        let parent_ref = parent_reference(&parent_id);

        let parent_request = match self.parent_builder().build_request(
            &parent,
            fieldlist,
            Some(&self.parent.sobject_type),
        ) {
            Ok(request) => request,
            Err(e) => {
                // No child is sent without its parent.
                warn!(parent_id = %parent_id, error = %e, "Cannot build parent request");
                parent.set_last_error(e.to_string());
                ctx.store.upsert(&self.parent.soup_name, parent).await?;
                return Ok(TreePass {
                    outcome: SyncUpOutcome {
                        failed: 1,
                        ..SyncUpOutcome::default()
                    },
                    events: vec![RecordEvent::Failed {
                        store: self.parent.soup_name.clone(),
                        record_id: parent_id,
                        status: NOT_ATTEMPTED,
                    }],
                    needs_rerun: false,
                });
            }
        };
        let parent_deleted = parent.is_locally_deleted();
        let parent_being_created = parent_request.as_ref().is_some_and(RecordRequest::is_create);

        let mut child_requests = Vec::new();
        let mut build_errors = HashMap::new();
        let child_builder = self.child_builder();
        let skip_children = parent_deleted && self.is_master_detail();
        let parent_id_field = self.children.parent_id_field_name.as_str();

        for child in children.iter_mut().filter(|c| c.is_dirty()) {
            ensure_id(child, &self.children.id_field_name)?;
            if skip_children {
                continue;
            }
            let child_ref = child_reference(&reference_id(child, &self.children.id_field_name)?);
            match child_builder.build_request(child, &[], Some(&self.children.sobject_type)) {
                Ok(Some(mut request)) => {
                    if let Some(fields) = request.fields_mut() {
                        if parent_deleted {
                            fields.remove(parent_id_field);
                        } else if parent_being_created {
                            fields.insert(
                                parent_id_field.to_string(),
                                Value::String(reference_to_id(&parent_ref)),
                            );
                        } else {
                            fields.insert(parent_id_field.to_string(), Value::String(parent_id.clone()));
                        }
                    }
                    child_requests.push((child_ref, request));
                }
                Ok(None) => {}
                Err(e) => {
                    build_errors.insert(child_ref, e.to_string());
                }
            }
        }

        // Children go first when the parent is being deleted.
        let mut requests = Vec::with_capacity(child_requests.len() + 1);
        match parent_request {
            Some(request) if request.is_delete() => {
                requests.extend(child_requests);
                requests.push((parent_ref.clone(), request));
            }
            Some(request) => {
                requests.push((parent_ref.clone(), request));
                requests.extend(child_requests);
            }
            None => requests.extend(child_requests),
        }

        let responses = if requests.is_empty() {
            HashMap::new()
        } else {
            CompositeCorrelator::new(&ctx.client).send(false, &requests).await?
        };

        let reconciler = TreeReconciler {
            target: self,
            ctx,
            merge_mode,
            is_rerun,
            has_parent_request: requests.iter().any(|(r, _)| *r == parent_ref),
            parent_id,
            parent_ref,
            id_map: extract_server_ids(&responses),
            responses,
            build_errors,
        };

        let store = &ctx.store;
        let transaction = store.begin_transaction().await?;
        match reconciler.reconcile(parent, children).await {
            Ok(pass) => {
                store.commit_transaction(transaction).await?;
                Ok(pass)
            }
            Err(e) => {
                if let Err(rollback_err) = store.rollback_transaction(transaction).await {
                    warn!(error = %rollback_err, "Rollback after failed reconciliation failed");
                }
                Err(e)
            }
        }
    }
}

/// Reference id of the parent within one composite call.
fn parent_reference(parent_id: &str) -> String {
    format!("parent_{}", parent_id)
}

/// Reference id of a child within one composite call. Never equal to the
/// parent's, whatever the row ids of the two stores.
fn child_reference(child_id: &str) -> String {
    format!("child_{}", child_id)
}

struct TreeReconciler<'a> {
    target: &'a ParentChildrenSyncUpTarget,
    ctx: &'a SyncContext,
    merge_mode: MergeMode,
    is_rerun: bool,
    parent_id: String,
    parent_ref: String,
    has_parent_request: bool,
    responses: HashMap<String, SubResponse>,
    id_map: HashMap<String, String>,
    build_errors: HashMap<String, String>,
}

impl TreeReconciler<'_> {
    fn response(&self, reference_id: &str) -> SubResponse {
        self.responses
            .get(reference_id)
            .cloned()
            .unwrap_or_else(|| SubResponse::not_attempted(reference_id))
    }

    /// Server id for a successful request: the created id, or the id in the
    /// body of an upsert that matched an existing row.
    fn server_id(&self, record: &Record, reference_id: &str, response: &SubResponse) -> Option<String> {
        self.id_map.get(reference_id).cloned().or_else(|| {
            if record.is_locally_created() {
                response.body_id().map(str::to_string)
            } else {
                None
            }
        })
    }

    fn mark_uploaded(&self, record: &mut Record) {
        record.mark_clean();
        if let Some(sync_id) = self.ctx.sync_id {
            record.insert(SYNC_ID.to_string(), Value::from(sync_id));
        }
    }

    fn fail(&self, store: &str, record: &mut Record, record_id: &str, response: &SubResponse) -> RecordEvent {
        warn!(
            record_id = %record_id,
            status = response.http_status_code,
            "Server rejected record"
        );
        record.set_last_error(response.error_text());
        RecordEvent::Failed {
            store: store.to_string(),
            record_id: record_id.to_string(),
            status: response.http_status_code,
        }
    }

    async fn reconcile(&self, mut parent: Record, mut children: Vec<Record>) -> Result<TreePass> {
        let target = self.target;
        let store = &self.ctx.store;
        let parent_soup = target.parent.soup_name.as_str();
        let children_soup = target.children.soup_name.as_str();
        let parent_id_field = target.parent.id_field_name.as_str();
        let child_id_field = target.children.id_field_name.as_str();
        let fk_field = target.children.parent_id_field_name.as_str();

        let mut pass = TreePass {
            outcome: SyncUpOutcome::default(),
            events: Vec::new(),
            needs_rerun: false,
        };

        let parent_entry = parent
            .entry_id()
            .ok_or_else(|| SyncError::MissingField(SOUP_ENTRY_ID.to_string()))?;
        let parent_deleted = parent.is_locally_deleted();
        let parent_response = self.response(&self.parent_ref);
        let parent_succeeded = self.has_parent_request && parent_response.is_success();

        let child_saw_deleted_parent = children.iter().any(|child| {
            child
                .string_field(child_id_field)
                .and_then(|id| self.responses.get(&child_reference(id)))
                .is_some_and(|r| r.http_status_code == 400 && r.has_error_code(ENTITY_IS_DELETED))
        });

        // Parent gone on the server: recreate the whole tree in a second pass.
        let parent_gone = !parent_deleted
            && !self.is_rerun
            && ((self.has_parent_request
                && parent_response.is_not_found()
                && self.merge_mode == MergeMode::Overwrite)
                || (child_saw_deleted_parent && !parent_succeeded));

        if parent_gone {
            debug!(parent_id = %self.parent_id, "Parent gone on the server, recreating tree");
            let updated = parent.is_locally_updated();
            parent.set_flags(true, updated, false);
            store.upsert(parent_soup, parent).await?;

            for mut child in children {
                let (created, updated, deleted) = (
                    child.is_locally_created(),
                    child.is_locally_updated(),
                    child.is_locally_deleted(),
                );
                if target.is_master_detail() {
                    child.set_flags(true, updated, deleted);
                } else {
                    child.set_flags(created, true, deleted);
                }
                store.upsert(children_soup, child).await?;
            }
            pass.needs_rerun = true;
            return Ok(pass);
        }

        // Parent
        let mut resolved_parent_id = None;
        if parent_deleted {
            if parent.is_locally_created() || parent_response.is_success() || parent_response.is_not_found() {
                store.delete(parent_soup, parent_entry).await?;
                pass.outcome.removed += 1;
                pass.events.push(RecordEvent::Removed {
                    store: parent_soup.to_string(),
                    record_id: self.parent_id.clone(),
                });

                if target.is_master_detail() {
                    store
                        .delete_where_id_in(children_soup, fk_field, &[self.parent_id.clone()])
                        .await?;
                    pass.outcome.removed += children.len() as u64;
                    return Ok(pass);
                }
            } else {
                pass.events
                    .push(self.fail(parent_soup, &mut parent, &self.parent_id, &parent_response));
                store.upsert(parent_soup, parent).await?;
                pass.outcome.failed += 1;
                if target.is_master_detail() {
                    return Ok(pass);
                }
            }
        } else if parent_succeeded {
            let server_id = self.server_id(&parent, &self.parent_ref, &parent_response);
            if let Some(id) = &server_id {
                parent.insert(parent_id_field.to_string(), Value::String(id.clone()));
            }
            self.mark_uploaded(&mut parent);
            store.upsert(parent_soup, parent).await?;
            pass.outcome.uploaded += 1;
            pass.events.push(RecordEvent::Uploaded {
                store: parent_soup.to_string(),
                record_id: server_id.clone().unwrap_or_else(|| self.parent_id.clone()),
            });
            resolved_parent_id = server_id;
        } else if self.has_parent_request {
            pass.events
                .push(self.fail(parent_soup, &mut parent, &self.parent_id, &parent_response));
            store.upsert(parent_soup, parent).await?;
            pass.outcome.failed += 1;
        }

        // Children
        for child in children.iter_mut() {
            let points_at_parent =
                child.get(fk_field).and_then(Value::as_str) == Some(self.parent_id.as_str());
            let fk_update = resolved_parent_id
                .as_ref()
                .filter(|id| points_at_parent && **id != self.parent_id);

            if !child.is_dirty() {
                if let Some(id) = fk_update {
                    child.insert(fk_field.to_string(), Value::String(id.clone()));
                    store.upsert(children_soup, child.clone()).await?;
                }
                continue;
            }

            let child_id = reference_id(child, child_id_field)?;
            let child_ref = child_reference(&child_id);
            let child_entry = child
                .entry_id()
                .ok_or_else(|| SyncError::MissingField(SOUP_ENTRY_ID.to_string()))?;
            if let Some(id) = fk_update {
                child.insert(fk_field.to_string(), Value::String(id.clone()));
            }

            if let Some(error) = self.build_errors.get(&child_ref) {
                child.set_last_error(error.clone());
                store.upsert(children_soup, child.clone()).await?;
                pass.outcome.failed += 1;
                pass.events.push(RecordEvent::Failed {
                    store: children_soup.to_string(),
                    record_id: child_id,
                    status: NOT_ATTEMPTED,
                });
                continue;
            }

            let response = self.response(&child_ref);

            if child.is_locally_deleted() {
                if child.is_locally_created() || response.is_success() || response.is_not_found() {
                    store.delete(children_soup, child_entry).await?;
                    pass.outcome.removed += 1;
                    pass.events.push(RecordEvent::Removed {
                        store: children_soup.to_string(),
                        record_id: child_id,
                    });
                } else {
                    pass.events.push(self.fail(children_soup, child, &child_id, &response));
                    store.upsert(children_soup, child.clone()).await?;
                    pass.outcome.failed += 1;
                }
            } else if response.is_success() {
                let server_id = self.server_id(child, &child_ref, &response);
                if let Some(id) = &server_id {
                    child.insert(child_id_field.to_string(), Value::String(id.clone()));
                }
                self.mark_uploaded(child);
                store.upsert(children_soup, child.clone()).await?;
                pass.outcome.uploaded += 1;
                pass.events.push(RecordEvent::Uploaded {
                    store: children_soup.to_string(),
                    record_id: server_id.unwrap_or(child_id),
                });
            } else if response.is_not_found()
                && self.merge_mode == MergeMode::Overwrite
                && !self.is_rerun
            {
                let updated = child.is_locally_updated();
                child.set_flags(true, updated, false);
                store.upsert(children_soup, child.clone()).await?;
                pass.needs_rerun = true;
            } else {
                pass.events.push(self.fail(children_soup, child, &child_id, &response));
                store.upsert(children_soup, child.clone()).await?;
                pass.outcome.failed += 1;
            }
        }

        Ok(pass)
    }
}
