//! Integration tests for the sync-up task driver

mod common;

use bridge_desktop::MemoryRecordStore;
use bridge_traits::time::FixedClock;
use chrono::Utc;
use common::*;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    BatchSyncUpTarget, ChildrenInfo, MergeMode, ParentChildrenSyncUpTarget, ParentInfo,
    RelationshipType, SyncError, SyncOptions, SyncRecord, SyncState, SyncStatus, SyncUpTask,
    TargetOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;

const SOUP: &str = "accounts";

fn task(server: Arc<FakeServer>, store: Arc<MemoryRecordStore>, events: EventBus) -> SyncUpTask {
    let clock = Arc::new(FixedClock(Utc::now()));
    SyncUpTask::new(context(server, store, SOUP), clock, events)
}

fn batch_state(max_batch_size: usize) -> SyncState {
    SyncState::new(
        7,
        BatchSyncUpTarget::new(TargetOptions::default(), max_batch_size),
        SyncOptions::new(fieldlist(&["Name"]), MergeMode::Overwrite),
        SOUP,
    )
}

async fn seed_updated(store: &MemoryRecordStore, count: usize) -> Vec<i64> {
    let mut ids = Vec::new();
    for i in 0..count {
        let record = seed(
            store,
            SOUP,
            json!({
                "Id": format!("001{}", i),
                "Name": format!("Account {}", i),
                "attributes": {"type": "Account"},
                "__local__": true,
                "__locally_updated__": true
            }),
        )
        .await;
        ids.push(entry_id(&record));
    }
    ids
}

fn sync_events(receiver: &mut Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let CoreEvent::Sync(event) = event {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn test_run_pages_through_dirty_records() {
    let store = Arc::new(MemoryRecordStore::new());
    let ids = seed_updated(&store, 3).await;
    let server = FakeServer::composite(|_, _, _| (204, Value::Null));
    let bus = EventBus::new(64);
    let mut receiver = bus.subscribe();

    let report = task(server.clone(), store.clone(), bus)
        .run(batch_state(2), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.state.status, SyncStatus::Done);
    assert_eq!(report.state.progress, 100);
    assert_eq!(report.state.total_size, Some(3));
    assert_eq!(report.records_total, 3);
    assert_eq!(report.records_processed, 3);
    assert_eq!(report.outcome.uploaded, 3);
    assert_eq!(server.composite_calls().len(), 2);

    for id in ids {
        let record = store.get(SOUP, id).await.unwrap();
        assert!(!record.is_dirty());
        assert_eq!(record["__sync_id__"], 7);
    }

    let events = sync_events(&mut receiver);
    assert_eq!(events.len(), 4);
    assert!(matches!(
        &events[0],
        SyncEvent::Started { sync_id: 7, total_records: 3, target, .. } if target == "batch"
    ));
    assert!(matches!(
        events[1],
        SyncEvent::Progress { records_processed: 2, percent: 66, .. }
    ));
    assert!(matches!(
        events[2],
        SyncEvent::Progress { records_processed: 3, percent: 100, .. }
    ));
    assert!(matches!(
        events[3],
        SyncEvent::Completed { records_processed: 3, records_uploaded: 3, .. }
    ));
}

#[tokio::test]
async fn test_cancellation_stops_between_pages() {
    let store = Arc::new(MemoryRecordStore::new());
    let ids = seed_updated(&store, 2).await;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let server = FakeServer::new(move |request| {
        token.cancel();
        (200, answer_composite(&request.body, &|_, _, _| (204, Value::Null)))
    });
    let bus = EventBus::new(64);
    let mut receiver = bus.subscribe();

    let report = task(server.clone(), store.clone(), bus)
        .run(batch_state(1), cancel)
        .await
        .unwrap();

    assert_eq!(report.state.status, SyncStatus::Stopped);
    assert_eq!(report.records_processed, 1);
    assert_eq!(server.composite_calls().len(), 1);
    assert!(!store.get(SOUP, ids[0]).await.unwrap().is_dirty());
    assert!(store.get(SOUP, ids[1]).await.unwrap().is_dirty());

    let events = sync_events(&mut receiver);
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Cancelled { records_processed: 1, .. })
    ));
}

#[tokio::test]
async fn test_server_failure_ends_in_failed_state() {
    let store = Arc::new(MemoryRecordStore::new());
    let ids = seed_updated(&store, 2).await;
    let server = FakeServer::new(|_| (500, json!([{"errorCode": "UNKNOWN_EXCEPTION"}])));
    let bus = EventBus::new(64);
    let mut receiver = bus.subscribe();

    let report = task(server, store.clone(), bus)
        .run(batch_state(25), CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.state.status, SyncStatus::Failed);
    assert!(report.state.error.is_some());
    assert!(report.state.end_time.is_some());
    for id in ids {
        assert!(store.get(SOUP, id).await.unwrap().is_dirty());
    }

    let events = sync_events(&mut receiver);
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Failed { sync_id: 7, records_processed: 0, .. })
    ));
}

#[tokio::test]
async fn test_running_state_is_rejected() {
    let store = Arc::new(MemoryRecordStore::new());
    let server = FakeServer::composite(|_, _, _| (204, Value::Null));
    let running = batch_state(25).start(0).unwrap();

    let result = task(server.clone(), store, EventBus::new(8))
        .run(running, CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SyncError::InvalidStateTransition { .. })
    ));
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_nothing_dirty_completes_at_full_progress() {
    let store = Arc::new(MemoryRecordStore::new());
    let server = FakeServer::composite(|_, _, _| (204, Value::Null));

    let report = task(server.clone(), store, EventBus::new(8))
        .run(batch_state(25), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state.status, SyncStatus::Done);
    assert_eq!(report.state.progress, 100);
    assert_eq!(report.records_total, 0);
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_parent_children_reads_parent_store() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        "parents",
        json!({"Id": "001P", "Name": "Acme", "__local__": true, "__locally_updated__": true}),
    )
    .await;
    let server = FakeServer::composite(|_, _, _| (204, Value::Null));

    let target = ParentChildrenSyncUpTarget::new(
        ParentInfo {
            sobject_type: "Account".to_string(),
            soup_name: "parents".to_string(),
            id_field_name: "Id".to_string(),
            modification_date_field_name: "LastModifiedDate".to_string(),
            external_id_field_name: None,
        },
        ChildrenInfo {
            sobject_type: "Contact".to_string(),
            sobject_type_plural: "Contacts".to_string(),
            soup_name: "children".to_string(),
            parent_id_field_name: "AccountId".to_string(),
            id_field_name: "Id".to_string(),
            modification_date_field_name: "LastModifiedDate".to_string(),
            external_id_field_name: None,
        },
        RelationshipType::Lookup,
    );
    let state = SyncState::new(
        8,
        target,
        SyncOptions::new(fieldlist(&["Name"]), MergeMode::Overwrite),
        SOUP,
    );

    let report = task(server.clone(), store.clone(), EventBus::new(8))
        .run(state, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.outcome.uploaded, 1);
    let subs = server.composite_calls()[0].subrequests();
    assert_eq!(subs[0].0, "PATCH");
    assert_eq!(subs[0].1, format!("{}/sobjects/Account/001P", API));
    assert!(!store.get("parents", entry_id(&parent)).await.unwrap().is_dirty());
}
