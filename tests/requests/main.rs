#[path = "../support/mod.rs"]
mod support;

use std::sync::{Arc, Mutex};

use cache_sync::{
    Action, ExchangeResult, Outcome, RequestCorrelator, RequestId, StoreEvent, StoreId, SyncError,
    TransportError,
};
use cache_sync::session::RequestStatus;
use serde_json::json;

use support::{field, id, is_dirty, set, set_at, Harness};

// =============================================================================
// Exactly-once resolution
// =============================================================================

#[test]
fn correlator_target_runs_once_per_exchange() {
    let calls: Arc<Mutex<Vec<ExchangeResult>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let mut correlator = RequestCorrelator::new(RequestId::new(1), Action::Update, Vec::new())
        .with_target(move |result| sink.lock().unwrap().push(result));

    assert!(correlator.start("mailitemmodule", "1", &json!({}), 10));
    for n in 0..5 {
        correlator.add_updated(id(&format!("E{}", n)), Default::default());
    }
    assert!(correlator.done(false));
    assert!(!correlator.done(true));
    assert!(!correlator.fail(TransportError::Timeout, 11));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].entries.len(), 5);
    assert!(!calls[0].success);
}

#[test]
fn duplicate_transport_response_is_ignored() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    set(&store, "E1", "subject", json!("edited"));

    let ids = h.session.save(&store).unwrap();
    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.deliver_response(ids[0], json!({"success": false, "error": {"message": "late"}}), 6);
    h.session.run_until_idle();

    let results = h.session.take_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert!(!is_dirty(&store, "E1"));
}

#[test]
fn network_failure_resolves_exactly_once() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    set(&store, "E1", "subject", json!("edited"));

    let exceptions = Arc::new(Mutex::new(Vec::new()));
    let sink = exceptions.clone();
    store
        .subscribe(Arc::new(move |_: StoreId, event: &StoreEvent| {
            if let StoreEvent::Exception { error, records, .. } = event {
                sink.lock().unwrap().push((error.clone(), records.clone()));
            }
        }))
        .unwrap();

    let ids = h.session.save(&store).unwrap();
    h.session.deliver_failure(ids[0], TransportError::Timeout, 7);
    h.session.deliver_failure(ids[0], TransportError::Timeout, 8);
    h.session.run_until_idle();

    let results = h.session.take_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].entries.is_empty());
    assert_eq!(
        *exceptions.lock().unwrap(),
        vec![("request timed out".to_string(), vec![id("E1")])]
    );
    assert!(is_dirty(&store, "E1"));
}

// =============================================================================
// Serialization of conflicting mutations
// =============================================================================

#[test]
fn second_update_waits_for_first() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);

    set(&store, "E1", "subject", json!("first"));
    let first = h.session.save(&store).unwrap();
    set(&store, "E1", "subject", json!("second"));
    let second = h.session.save(&store).unwrap();

    assert_eq!(h.transport.len(), 1);
    assert_eq!(h.session.status(second[0]), Some(RequestStatus::Held));

    h.session.deliver_response(first[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].request_id, second[0]);
    assert_eq!(sent[1].payload["props"]["subject"], "second");
    assert_eq!(h.session.status(second[0]), Some(RequestStatus::InFlight));
}

#[test]
fn edits_made_in_flight_stay_dirty() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);

    set(&store, "E1", "subject", json!("first"));
    let first = h.session.save(&store).unwrap();
    set(&store, "E1", "subject", json!("second"));

    h.session.deliver_response(first[0], json!({"item": {"entryid": "E1", "subject": "first"}}), 5);
    h.session.run_until_idle();

    assert_eq!(field(&store, "E1", "subject"), Some(json!("second")));
    assert!(is_dirty(&store, "E1"));
}

#[test]
fn different_records_are_not_serialized() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1", "E2"]);
    set(&store, "E1", "subject", json!("a"));
    set(&store, "E2", "subject", json!("b"));

    let ids = h.session.save(&store).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(h.transport.len(), 2);
}

#[test]
fn reads_are_not_serialized_behind_writes() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    set(&store, "E1", "subject", json!("a"));
    h.session.save(&store).unwrap();

    let open = h.session.open(&store, &id("E1")).unwrap();
    assert_eq!(h.session.status(open), Some(RequestStatus::InFlight));
    assert_eq!(h.transport.len(), 2);
}

#[test]
fn repeated_save_of_new_record_creates_it_once() {
    let mut h = Harness::new();
    let store = h.mail_store(&[]);
    let key = store
        .with(|s| s.create(support::map(json!({"subject": "draft"}))))
        .unwrap()
        .unwrap();

    let first = h.session.save(&store).unwrap();
    let second = h.session.save(&store).unwrap();
    assert_eq!(h.session.status(second[0]), Some(RequestStatus::Held));

    h.session
        .deliver_response(first[0], json!({"item": {"id": key.as_str(), "entryid": "E2"}}), 5);
    h.session.run_until_idle();

    assert_eq!(h.transport.len(), 1);
    assert_eq!(h.session.status(second[0]), None);
    assert_eq!(h.session.pending_count(), 0);
    assert!(!is_dirty(&store, "E2"));
}

#[test]
fn held_save_of_new_record_becomes_an_update() {
    let mut h = Harness::new();
    let store = h.mail_store(&[]);
    let key = store
        .with(|s| s.create(support::map(json!({"subject": "draft"}))))
        .unwrap()
        .unwrap();

    let first = h.session.save(&store).unwrap();
    store
        .with(|s| s.set(&key, "subject", json!("final")))
        .unwrap()
        .unwrap();
    let second = h.session.save(&store).unwrap();

    h.session
        .deliver_response(first[0], json!({"item": {"id": key.as_str(), "entryid": "E2"}}), 5);
    h.session.run_until_idle();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].request_id, second[0]);
    assert_eq!(sent[1].payload, json!({"props": {"entryid": "E2", "subject": "final"}}));
    assert!(h.session.is_executing(&store, Action::Update));

    // A later write of the new key waits behind the released one.
    let third = h.session.save(&store).unwrap();
    assert_eq!(h.session.status(third[0]), Some(RequestStatus::Held));

    h.session
        .deliver_response(second[0], json!({"item": {"entryid": "E2", "subject": "final"}}), 6);
    h.session.run_until_idle();
    assert!(!is_dirty(&store, "E2"));
    assert_eq!(h.session.status(third[0]), None);
    assert_eq!(h.transport.len(), 2);
}

// =============================================================================
// Partial failure, per-record requests
// =============================================================================

#[test]
fn failed_record_stays_dirty_others_commit() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1", "E2", "E3"]);
    for key in ["E1", "E2", "E3"] {
        set(&store, key, "subject", json!("edited"));
    }

    let ids = h.session.save(&store).unwrap();
    assert_eq!(ids.len(), 3);
    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session
        .deliver_response(ids[1], json!({"success": false, "error": {"message": "no access"}}), 5);
    h.session.deliver_response(ids[2], json!({"success": true}), 5);
    h.session.run_until_idle();

    assert!(!is_dirty(&store, "E1"));
    assert!(is_dirty(&store, "E2"));
    assert!(!is_dirty(&store, "E3"));
    let failed = h.session.take_results().into_iter().find(|r| !r.success).unwrap();
    assert_eq!(failed.entries[0].outcome, Outcome::Failed("not applied".to_string()));
    assert_eq!(failed.error.as_deref(), Some("no access"));
}

#[test]
fn destroy_is_applied_after_response() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    store.with(|s| s.remove(&id("E1"))).unwrap().unwrap();
    assert_eq!(store.read(|s| s.removed().len()).unwrap(), 1);

    let ids = h.session.save(&store).unwrap();
    assert_eq!(h.transport.last().unwrap().server_action, "delete");
    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    assert!(store.read(|s| s.removed().is_empty()).unwrap());
    assert!(!store.read(|s| s.has_pending_changes()).unwrap());
}

// =============================================================================
// Cancellation and store liveness
// =============================================================================

#[test]
fn cancelled_request_still_resolves_but_does_not_apply() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    let listing = h.session.load(&store, json!({})).unwrap();

    assert!(h.session.cancel(listing));
    assert!(!h.session.is_executing(&store, Action::List));
    h.session.deliver_response(listing, json!({"list": [{"entryid": "X"}]}), 9);
    h.session.run_until_idle();

    assert_eq!(h.session.take_results().len(), 1);
    assert!(store.contains(&id("E1")));
    assert!(!store.contains(&id("X")));
    assert_eq!(h.session.pending_count(), 0);
}

#[test]
fn cancelling_held_request_releases_the_lane() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    set(&store, "E1", "subject", json!("one"));
    let first = h.session.save(&store).unwrap();
    set(&store, "E1", "subject", json!("two"));
    let second = h.session.save(&store).unwrap();
    set(&store, "E1", "subject", json!("three"));
    let third = h.session.save(&store).unwrap();

    assert!(h.session.cancel(second[0]));
    assert_eq!(h.session.status(second[0]), None);

    h.session.deliver_response(first[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    let sent: Vec<_> = h.transport.sent().iter().map(|r| r.request_id).collect();
    assert_eq!(sent, vec![first[0], third[0]]);
}

#[test]
fn result_for_unregistered_store_is_dropped() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    set_at(&store, "E1", "subject", json!("edited"), 1);
    let ids = h.session.save(&store).unwrap();

    h.registry.unregister(&store);
    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    assert_eq!(h.session.take_results().len(), 1);
    assert!(is_dirty(&store, "E1"));
    assert_eq!(store.read(|s| s.last_execution_time(Action::Update)).unwrap(), 0);
}

#[test]
fn result_for_destroyed_store_is_dropped() {
    let mut h = Harness::new();
    let store = h.mail_store(&["E1"]);
    let listing = h.session.load(&store, json!({})).unwrap();

    store.destroy();
    h.session.deliver_response(listing, json!({"list": [{"entryid": "X"}]}), 5);
    h.session.run_until_idle();

    assert!(!store.contains(&id("X")));
    assert!(!h.registry.is_registered(store.id()));
}

#[test]
fn standalone_store_still_gets_its_results() {
    let mut h = Harness::new();
    let scratch = h.registry.create_store(cache_sync::StoreOptions::new("mail").standalone());
    let listing = h.session.load(&scratch, json!({})).unwrap();

    h.session.deliver_response(listing, json!({"list": [{"entryid": "S1"}]}), 5);
    h.session.run_until_idle();

    assert!(scratch.contains(&id("S1")));
}

#[test]
fn open_of_missing_record_is_an_error() {
    let mut h = Harness::new();
    let store = h.mail_store(&[]);
    assert_eq!(
        h.session.open(&store, &id("nope")),
        Err(SyncError::RecordNotFound(id("nope")))
    );
}

#[test]
fn created_push_is_ignored_when_listing_is_newer() {
    let mut h = Harness::new();
    let store = h.store(cache_sync::StoreOptions::new("mail").with_collection("inbox"), &[]);
    let listing = h.session.load(&store, json!({})).unwrap();
    h.session.deliver_response(listing, json!({"list": []}), 100);
    h.session.run_until_idle();
    assert!(h.session.is_idle());

    let push = |entryid: &str| {
        json!({"notifications": [{
            "action": "objectCreated",
            "data": {"entryid": entryid, "parent_entryid": "inbox"}
        }]})
    };
    h.session.deliver_push("hierarchynotifier", push("OLD"), 90);
    h.session.deliver_push("hierarchynotifier", push("NEW"), 110);
    h.session.run_until_idle();

    assert!(!store.contains(&id("OLD")));
    assert!(store.contains(&id("NEW")));
}
