//! Integration tests for the parent/children target

mod common;

use bridge_desktop::MemoryRecordStore;
use bridge_traits::http::HttpMethod;
use bridge_traits::LocalStore;
use common::*;
use core_sync::{
    ChildrenInfo, MergeMode, ParentChildrenSyncUpTarget, ParentInfo, RelationshipType, SyncError,
    SyncRecord, SyncUpOutcome, SyncUpTarget,
};
use serde_json::{json, Value};
use std::sync::Arc;

const PARENTS: &str = "accounts";
const CHILDREN: &str = "contacts";
const OLD: &str = "2024-01-01T00:00:00.000+0000";
const NEW: &str = "2024-06-01T00:00:00.000+0000";

fn target(relationship_type: RelationshipType) -> SyncUpTarget {
    target_with_parent_type("Account", relationship_type)
}

fn target_with_parent_type(parent_type: &str, relationship_type: RelationshipType) -> SyncUpTarget {
    ParentChildrenSyncUpTarget::new(
        ParentInfo {
            sobject_type: parent_type.to_string(),
            soup_name: PARENTS.to_string(),
            id_field_name: "Id".to_string(),
            modification_date_field_name: "LastModifiedDate".to_string(),
            external_id_field_name: None,
        },
        ChildrenInfo {
            sobject_type: "Contact".to_string(),
            sobject_type_plural: "Contacts".to_string(),
            soup_name: CHILDREN.to_string(),
            parent_id_field_name: "AccountId".to_string(),
            id_field_name: "Id".to_string(),
            modification_date_field_name: "LastModifiedDate".to_string(),
            external_id_field_name: None,
        },
        relationship_type,
    )
    .with_children_fieldlists(
        fieldlist(&["LastName", "AccountId"]),
        fieldlist(&["LastName", "AccountId"]),
    )
    .into()
}

async fn run_pass(
    target: &SyncUpTarget,
    server: Arc<FakeServer>,
    store: Arc<MemoryRecordStore>,
    merge_mode: MergeMode,
) -> Result<SyncUpOutcome, SyncError> {
    let ctx = context(server, store.clone(), PARENTS);
    let mut outcome = SyncUpOutcome::default();
    for id in target.dirty_record_ids(&ctx).await? {
        let records = store.retrieve(PARENTS, "_soupEntryId", &[id]).await.unwrap();
        outcome.merge(
            target
                .sync_up_records(&ctx, records, &fieldlist(&["Name"]), merge_mode)
                .await?,
        );
    }
    Ok(outcome)
}

async fn child(store: &MemoryRecordStore, value: Value) -> bridge_traits::Record {
    seed(store, CHILDREN, value).await
}

/// Creates answered with ids derived from the name, everything else 204.
fn echo_server() -> Arc<FakeServer> {
    FakeServer::composite(|method, url, body| match method {
        "POST" if url.ends_with("/sobjects/Account") => {
            (201, json!({"id": "001P", "success": true, "errors": []}))
        }
        "POST" => (
            201,
            json!({"id": format!("003{}", body["LastName"].as_str().unwrap_or("X")), "success": true, "errors": []}),
        ),
        _ => (204, Value::Null),
    })
}

#[tokio::test]
async fn test_new_tree_uploads_in_one_call_with_references() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "local_acme", "Name": "Acme", "__local__": true, "__locally_created__": true}),
    )
    .await;
    let first = child(
        &store,
        json!({"Id": "local_c1", "LastName": "A", "AccountId": "local_acme", "__local__": true, "__locally_created__": true}),
    )
    .await;
    let second = child(
        &store,
        json!({"Id": "local_c2", "LastName": "B", "AccountId": "local_acme", "__local__": true, "__locally_created__": true}),
    )
    .await;

    let server = echo_server();
    let outcome = run_pass(
        &target(RelationshipType::MasterDetail),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.uploaded, 3);

    let calls = server.composite_calls();
    assert_eq!(calls.len(), 1);
    let refs: Vec<String> = calls[0].subrequests().into_iter().map(|(_, _, r)| r).collect();
    assert_eq!(refs, vec!["parent_local_acme", "child_local_c1", "child_local_c2"]);
    assert_eq!(
        calls[0].body["compositeRequest"][1]["body"]["AccountId"],
        "@{parent_local_acme.id}"
    );

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert_eq!(parent["Id"], "001P");
    assert!(!parent.is_dirty());

    let first = store.get(CHILDREN, entry_id(&first)).await.unwrap();
    assert_eq!(first["Id"], "003A");
    assert_eq!(first["AccountId"], "001P");
    assert!(!first.is_dirty());

    let second = store.get(CHILDREN, entry_id(&second)).await.unwrap();
    assert_eq!(second["Id"], "003B");
    assert_eq!(second["AccountId"], "001P");
}

#[tokio::test]
async fn test_dirty_child_of_clean_parent_uses_literal_parent_id() {
    let store = Arc::new(MemoryRecordStore::new());
    seed(&store, PARENTS, json!({"Id": "001P", "Name": "Acme", "__local__": false})).await;
    let changed = child(
        &store,
        json!({"Id": "003A", "LastName": "A", "AccountId": "001P", "__local__": true, "__locally_updated__": true}),
    )
    .await;

    let server = echo_server();
    let outcome = run_pass(
        &target(RelationshipType::Lookup),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.uploaded, 1);

    let calls = server.composite_calls();
    let subs = calls[0].subrequests();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].0, "PATCH");
    assert_eq!(subs[0].1, format!("{}/sobjects/Contact/003A", API));
    assert_eq!(calls[0].body["compositeRequest"][0]["body"]["AccountId"], "001P");

    assert!(!store.get(CHILDREN, entry_id(&changed)).await.unwrap().is_dirty());
}

#[tokio::test]
async fn test_master_detail_parent_delete_removes_children_locally() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "001P", "__local__": true, "__locally_deleted__": true}),
    )
    .await;
    child(&store, json!({"Id": "003A", "AccountId": "001P", "__local__": false})).await;
    child(
        &store,
        json!({"Id": "003B", "LastName": "B", "AccountId": "001P", "__local__": true, "__locally_updated__": true}),
    )
    .await;

    let server = echo_server();
    let outcome = run_pass(
        &target(RelationshipType::MasterDetail),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.removed, 3);

    let subs = server.composite_calls()[0].subrequests();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].0, "DELETE");
    assert_eq!(subs[0].2, "parent_001P");

    assert!(store.get(PARENTS, entry_id(&parent)).await.is_none());
    assert!(store.is_empty(CHILDREN).await);
}

#[tokio::test]
async fn test_lookup_parent_delete_sends_children_first() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "001P", "__local__": true, "__locally_deleted__": true}),
    )
    .await;
    let changed = child(
        &store,
        json!({"Id": "003B", "LastName": "B", "AccountId": "001P", "__local__": true, "__locally_updated__": true}),
    )
    .await;

    let server = echo_server();
    let outcome = run_pass(
        &target(RelationshipType::Lookup),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.uploaded, 1);

    let calls = server.composite_calls();
    let subs = calls[0].subrequests();
    assert_eq!(
        subs.iter().map(|(m, _, r)| (m.as_str(), r.as_str())).collect::<Vec<_>>(),
        vec![("PATCH", "child_003B"), ("DELETE", "parent_001P")]
    );
    assert!(calls[0].body["compositeRequest"][0]["body"]
        .get("AccountId")
        .is_none());

    assert!(store.get(PARENTS, entry_id(&parent)).await.is_none());
    assert!(!store.get(CHILDREN, entry_id(&changed)).await.unwrap().is_dirty());
}

#[tokio::test]
async fn test_parent_deleted_on_server_recreates_tree() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "001P", "Name": "Acme", "__local__": true, "__locally_updated__": true}),
    )
    .await;
    let existing = child(
        &store,
        json!({"Id": "003A", "LastName": "Z", "AccountId": "001P", "__local__": false}),
    )
    .await;

    let server = FakeServer::composite(|method, url, _| match method {
        "PATCH" => (404, json!([{"errorCode": "ENTITY_IS_DELETED"}])),
        "POST" if url.ends_with("/sobjects/Account") => (201, json!({"id": "001Q"})),
        "POST" => (201, json!({"id": "003Z"})),
        _ => (204, Value::Null),
    });

    let outcome = run_pass(
        &target(RelationshipType::MasterDetail),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.uploaded, 2);

    let calls = server.composite_calls();
    assert_eq!(calls.len(), 2);
    let second = calls[1].subrequests();
    assert_eq!(second[0].0, "POST");
    assert_eq!(second[0].2, "parent_001P");
    assert_eq!(second[1].0, "POST");
    assert_eq!(
        calls[1].body["compositeRequest"][1]["body"]["AccountId"],
        "@{parent_001P.id}"
    );

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert_eq!(parent["Id"], "001Q");
    assert!(!parent.is_dirty());

    let existing = store.get(CHILDREN, entry_id(&existing)).await.unwrap();
    assert_eq!(existing["Id"], "003Z");
    assert_eq!(existing["AccountId"], "001Q");
    assert!(!existing.is_dirty());
}

#[tokio::test]
async fn test_child_seeing_deleted_parent_recreates_regardless_of_merge_mode() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(&store, PARENTS, json!({"Id": "001P", "Name": "Acme", "__local__": false})).await;
    let changed = child(
        &store,
        json!({
            "Id": "003A",
            "LastName": "A",
            "AccountId": "001P",
            "LastModifiedDate": NEW,
            "__local__": true,
            "__locally_updated__": true
        }),
    )
    .await;

    let server = FakeServer::new(|request| {
        if request.method == HttpMethod::Get {
            return (200, json!({"totalSize": 0, "done": true, "records": []}));
        }
        let answer = |method: &str, url: &str, _: &Value| match method {
            "PATCH" => (400, json!([{"errorCode": "ENTITY_IS_DELETED", "message": "entity is deleted"}])),
            "POST" if url.ends_with("/sobjects/Account") => (201, json!({"id": "001Q"})),
            _ => (201, json!({"id": "003Q"})),
        };
        (200, answer_composite(&request.body, &answer))
    });

    let outcome = run_pass(
        &target(RelationshipType::MasterDetail),
        server.clone(),
        store.clone(),
        MergeMode::LeaveIfChanged,
    )
    .await
    .unwrap();
    assert_eq!(outcome.uploaded, 2);
    assert_eq!(outcome.conflicts, 0);
    assert_eq!(server.composite_calls().len(), 2);

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert_eq!(parent["Id"], "001Q");
    let changed = store.get(CHILDREN, entry_id(&changed)).await.unwrap();
    assert_eq!(changed["Id"], "003Q");
    assert_eq!(changed["AccountId"], "001Q");
    assert!(!changed.is_dirty());
}

#[tokio::test]
async fn test_leave_if_changed_skips_tree_with_newer_server_rows() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({
            "Id": "001P",
            "Name": "Acme",
            "LastModifiedDate": NEW,
            "__local__": true,
            "__locally_updated__": true
        }),
    )
    .await;
    let changed = child(
        &store,
        json!({
            "Id": "003A",
            "LastName": "A",
            "AccountId": "001P",
            "LastModifiedDate": OLD,
            "__local__": true,
            "__locally_updated__": true
        }),
    )
    .await;

    let server = FakeServer::new(|request| {
        if request.method == HttpMethod::Get && request.url.contains("/query?q=") {
            return (
                200,
                json!({
                    "totalSize": 1,
                    "done": true,
                    "records": [{
                        "Id": "001P",
                        "LastModifiedDate": OLD,
                        "Contacts": {
                            "totalSize": 1,
                            "done": true,
                            "records": [{"Id": "003A", "LastModifiedDate": NEW}]
                        }
                    }]
                }),
            );
        }
        (500, Value::Null)
    });

    let outcome = run_pass(
        &target(RelationshipType::Lookup),
        server.clone(),
        store.clone(),
        MergeMode::LeaveIfChanged,
    )
    .await
    .unwrap();
    assert_eq!(outcome.conflicts, 2);
    assert_eq!(outcome.uploaded, 0);
    assert!(server.composite_calls().is_empty());

    let query = &server.requests()[0];
    assert!(query.url.contains("FROM%20Account"));
    assert!(query.url.contains("FROM%20Contacts"));

    assert_eq!(store.get(PARENTS, entry_id(&parent)).await.unwrap(), parent);
    assert_eq!(store.get(CHILDREN, entry_id(&changed)).await.unwrap(), changed);
}

#[tokio::test]
async fn test_more_than_one_parent_is_rejected() {
    let store = Arc::new(MemoryRecordStore::new());
    let ctx = context(echo_server(), store, PARENTS);
    let records = vec![
        record(json!({"_soupEntryId": 1, "Id": "001A", "__local__": true, "__locally_updated__": true})),
        record(json!({"_soupEntryId": 2, "Id": "001B", "__local__": true, "__locally_updated__": true})),
    ];

    let result = target(RelationshipType::Lookup)
        .sync_up_records(&ctx, records, &fieldlist(&["Name"]), MergeMode::Overwrite)
        .await;
    assert!(matches!(
        result,
        Err(SyncError::BatchTooLarge { size: 2, max: 1 })
    ));
}

#[tokio::test]
async fn test_same_entry_id_in_both_stores_keeps_references_apart() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"_soupEntryId": 7, "Name": "Acme", "__local__": true, "__locally_created__": true}),
    )
    .await;
    let created = child(
        &store,
        json!({
            "_soupEntryId": 7,
            "LastName": "A",
            "AccountId": "local_7",
            "__local__": true,
            "__locally_created__": true
        }),
    )
    .await;

    let server = echo_server();
    let outcome = run_pass(
        &target(RelationshipType::MasterDetail),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.uploaded, 2);

    let calls = server.composite_calls();
    assert_eq!(calls.len(), 1);
    let refs: Vec<String> = calls[0].subrequests().into_iter().map(|(_, _, r)| r).collect();
    assert_eq!(refs, vec!["parent_local_7", "child_local_7"]);
    assert_eq!(
        calls[0].body["compositeRequest"][1]["body"]["AccountId"],
        "@{parent_local_7.id}"
    );

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert_eq!(parent["Id"], "001P");
    let created = store.get(CHILDREN, entry_id(&created)).await.unwrap();
    assert_eq!(created["Id"], "003A");
    assert_eq!(created["AccountId"], "001P");
    assert!(!created.is_dirty());
}

#[tokio::test]
async fn test_leave_if_changed_compares_clean_children_too() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({
            "Id": "001P",
            "Name": "Acme",
            "LastModifiedDate": NEW,
            "__local__": true,
            "__locally_updated__": true
        }),
    )
    .await;
    let unchanged = child(
        &store,
        json!({
            "Id": "003A",
            "LastName": "A",
            "AccountId": "001P",
            "LastModifiedDate": OLD,
            "__local__": false
        }),
    )
    .await;

    let server = FakeServer::new(|request| {
        if request.method == HttpMethod::Get && request.url.contains("/query?q=") {
            return (
                200,
                json!({
                    "totalSize": 1,
                    "done": true,
                    "records": [{
                        "Id": "001P",
                        "LastModifiedDate": OLD,
                        "Contacts": {
                            "totalSize": 1,
                            "done": true,
                            "records": [{"Id": "003A", "LastModifiedDate": NEW}]
                        }
                    }]
                }),
            );
        }
        (500, Value::Null)
    });

    let outcome = run_pass(
        &target(RelationshipType::Lookup),
        server.clone(),
        store.clone(),
        MergeMode::LeaveIfChanged,
    )
    .await
    .unwrap();
    assert_eq!(outcome.conflicts, 1);
    assert_eq!(outcome.uploaded, 0);
    assert!(server.composite_calls().is_empty());

    assert_eq!(store.get(PARENTS, entry_id(&parent)).await.unwrap(), parent);
    assert_eq!(store.get(CHILDREN, entry_id(&unchanged)).await.unwrap(), unchanged);
}

#[tokio::test]
async fn test_parent_request_error_fails_parent_and_holds_children() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "001P", "Name": "Acme", "__local__": true, "__locally_updated__": true}),
    )
    .await;
    let changed = child(
        &store,
        json!({"Id": "003A", "LastName": "A", "AccountId": "001P", "__local__": true, "__locally_updated__": true}),
    )
    .await;

    let server = echo_server();
    let outcome = run_pass(
        &target_with_parent_type("", RelationshipType::Lookup),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.uploaded, 0);
    assert!(server.requests().is_empty());

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert!(parent.is_dirty());
    assert!(parent["__last_error__"].as_str().unwrap().contains("attributes.type"));
    assert_eq!(store.get(CHILDREN, entry_id(&changed)).await.unwrap(), changed);
}

#[tokio::test]
async fn test_lookup_parent_gone_resends_children_as_updates() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "001P", "Name": "Acme", "__local__": true, "__locally_updated__": true}),
    )
    .await;
    let existing = child(
        &store,
        json!({"Id": "003A", "LastName": "Z", "AccountId": "001P", "__local__": false}),
    )
    .await;

    let server = FakeServer::composite(|method, url, _| match method {
        "PATCH" if url.contains("/sobjects/Account/") => {
            (404, json!([{"errorCode": "ENTITY_IS_DELETED"}]))
        }
        "POST" => (201, json!({"id": "001Q"})),
        _ => (204, Value::Null),
    });

    let outcome = run_pass(
        &target(RelationshipType::Lookup),
        server.clone(),
        store.clone(),
        MergeMode::Overwrite,
    )
    .await
    .unwrap();
    assert_eq!(outcome.uploaded, 2);

    let calls = server.composite_calls();
    assert_eq!(calls.len(), 2);
    let second = calls[1].subrequests();
    assert_eq!(
        second.iter().map(|(m, _, r)| (m.as_str(), r.as_str())).collect::<Vec<_>>(),
        vec![("POST", "parent_001P"), ("PATCH", "child_003A")]
    );
    assert_eq!(second[1].1, format!("{}/sobjects/Contact/003A", API));
    assert_eq!(
        calls[1].body["compositeRequest"][1]["body"]["AccountId"],
        "@{parent_001P.id}"
    );

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert_eq!(parent["Id"], "001Q");
    let existing = store.get(CHILDREN, entry_id(&existing)).await.unwrap();
    assert_eq!(existing["Id"], "003A");
    assert_eq!(existing["AccountId"], "001Q");
    assert!(!existing.is_dirty());
}

#[tokio::test]
async fn test_tree_reads_and_writes_its_own_parent_store() {
    let store = Arc::new(MemoryRecordStore::new());
    let parent = seed(
        &store,
        PARENTS,
        json!({"Id": "001P", "Name": "Acme", "__local__": true, "__locally_updated__": true}),
    )
    .await;

    let server = FakeServer::composite(|method, _, _| match method {
        "PATCH" => (404, json!([{"errorCode": "ENTITY_IS_DELETED"}])),
        _ => (201, json!({"id": "001Q"})),
    });
    let ctx = context(server.clone(), store.clone(), "unrelated");
    let target = target(RelationshipType::MasterDetail);

    let mut outcome = SyncUpOutcome::default();
    for id in target.dirty_record_ids(&ctx).await.unwrap() {
        let records = store.retrieve(PARENTS, "_soupEntryId", &[id]).await.unwrap();
        outcome.merge(
            target
                .sync_up_records(&ctx, records, &fieldlist(&["Name"]), MergeMode::Overwrite)
                .await
                .unwrap(),
        );
    }
    assert_eq!(outcome.uploaded, 1);
    assert_eq!(server.composite_calls().len(), 2);

    let parent = store.get(PARENTS, entry_id(&parent)).await.unwrap();
    assert_eq!(parent["Id"], "001Q");
    assert!(!parent.is_dirty());
    assert!(store.is_empty("unrelated").await);
}
