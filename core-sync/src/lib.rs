//! # Sync-Up Engine
//!
//! Pushes locally modified records to the REST data service and reconciles
//! the local store with what the server answered.
//!
//! ## Overview
//!
//! Records live in a host-owned [`LocalStore`](bridge_traits::LocalStore) and
//! carry dirty flags (`__locally_created__`, `__locally_updated__`,
//! `__locally_deleted__`, with `__local__` as their OR). A sync-up run finds
//! the dirty rows, turns each into a create, upsert, update or delete, sends
//! them in batched calls, then cleans, re-identifies, removes or annotates
//! every record according to its sub-response.
//!
//! ## Components
//!
//! - **Field Projector** (`fields`): builds request bodies from field lists
//! - **Dirty-Record Locator** (`locator`): pages through dirty row ids
//! - **Request Builder** (`request`): decides the request a record needs
//! - **Composite Correlator** (`composite`): one round trip, answers keyed by
//!   reference id, `@{ref.id}` forward references
//! - **Conflict Classifier** (`conflict`): local-vs-server timestamp rule for
//!   `LEAVE_IF_CHANGED`
//! - **Targets** (`target`): batch, collection and parent/children strategies
//! - **Sync State** (`state`): persisted definition and run lifecycle
//! - **Task** (`task`): page-by-page driver with cancellation and events

pub mod composite;
pub mod conflict;
pub mod error;
pub mod fields;
pub mod locator;
pub mod record;
pub mod request;
pub mod state;
pub mod target;
pub mod task;

pub use composite::{
    extract_server_ids, reference_to_id, resolve_reference, CompositeCorrelator, SubResponse,
};
pub use conflict::{is_newer_than_server, MergeMode, RecordModDate};
pub use error::{Result, SyncError};
pub use fields::{field_value, project_fields, FieldValue};
pub use locator::DirtyRecordLocator;
pub use record::SyncRecord;
pub use request::{RecordRequest, RequestBuilder};
pub use state::{SyncOptions, SyncState, SyncStatus};
pub use target::{
    BatchSyncUpTarget, ChildrenInfo, CollectionSyncUpTarget, ParentChildrenSyncUpTarget,
    ParentInfo, RelationshipType, SyncContext, SyncUpOutcome, SyncUpTarget, TargetOptions,
};
pub use task::{SyncUpReport, SyncUpTask};
