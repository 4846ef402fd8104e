#[path = "../support/mod.rs"]
mod support;

use cache_sync::{Action, BatchOutcome, BatchPhase, StoreHandle, StoreOptions, SyncError};
use serde_json::json;

use support::{field, id, is_dirty, map, set, Harness};

fn rules_options() -> StoreOptions {
    StoreOptions::new("rules")
        .with_id_properties(["rule_id"])
        .with_collection("store-1")
        .batched()
}

fn rules(h: &Harness, ids: &[&str]) -> StoreHandle {
    let records: Vec<_> = ids
        .iter()
        .map(|rule| json!({"rule_id": rule, "name": format!("rule {}", rule)}))
        .collect();
    h.store(rules_options(), &records)
}

#[test]
fn batch_sends_every_record_in_order() {
    let mut h = Harness::new();
    let store = rules(&h, &["1", "2", "3"]);
    set(&store, "2", "name", json!("renamed"));

    let ids = h.session.save(&store).unwrap();
    assert_eq!(ids.len(), 1);

    let sent = h.transport.last().unwrap();
    assert_eq!(sent.module, "ruleslistmodule");
    assert_eq!(sent.payload["collection"], "store-1");
    let items = sent.payload["items"].as_array().unwrap();
    let names: Vec<_> = items.iter().map(|item| item["name"].clone()).collect();
    assert_eq!(names, vec![json!("rule 1"), json!("renamed"), json!("rule 3")]);
}

#[test]
fn rejected_entry_stays_dirty_and_fails_the_batch() {
    let mut h = Harness::new();
    let store = rules(&h, &["1", "2", "3"]);
    for rule in ["1", "2", "3"] {
        set(&store, rule, "name", json!(format!("edited {}", rule)));
    }

    let ids = h.session.save(&store).unwrap();
    let body = json!({"items": [
        {"success": true},
        {"success": false, "error": "invalid condition"},
        {"success": true},
    ]});
    h.session.deliver_response(ids[0], body, 5);
    h.session.run_until_idle();

    let results = h.session.take_results();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(!is_dirty(&store, "1"));
    assert!(is_dirty(&store, "2"));
    assert!(!is_dirty(&store, "3"));

    let batch = h.session.batch(store.id()).unwrap();
    assert_eq!(batch.phase(), BatchPhase::Idle);
    assert_eq!(
        batch.last_outcome(),
        Some(&BatchOutcome::Rejected {
            failed: vec![id("2")]
        })
    );
    assert_eq!(store.read(|s| s.last_execution_time(Action::Update)).unwrap(), 0);
}

#[test]
fn accepted_batch_commits_everything() {
    let mut h = Harness::new();
    let store = rules(&h, &["1", "2"]);
    set(&store, "1", "name", json!("first"));

    let ids = h.session.save(&store).unwrap();
    h.session
        .deliver_response(ids[0], json!({"items": [{"success": true}, {"success": true}]}), 7);
    h.session.run_until_idle();

    assert!(!store.read(|s| s.has_pending_changes()).unwrap());
    assert_eq!(
        h.session.batch(store.id()).unwrap().last_outcome(),
        Some(&BatchOutcome::Applied)
    );
    assert_eq!(store.read(|s| s.last_execution_time(Action::Update)).unwrap(), 7);
}

#[test]
fn second_batch_is_refused_while_sending() {
    let mut h = Harness::new();
    let store = rules(&h, &["1"]);
    set(&store, "1", "name", json!("first"));
    let ids = h.session.save(&store).unwrap();

    set(&store, "1", "name", json!("second"));
    assert_eq!(
        h.session.save(&store),
        Err(SyncError::BatchInFlight { store: store.id() })
    );
    assert_eq!(h.transport.len(), 1);

    h.session
        .deliver_response(ids[0], json!({"items": [{"success": true}]}), 5);
    h.session.run_until_idle();
    assert!(is_dirty(&store, "1"));

    h.session.save(&store).unwrap();
    assert_eq!(h.transport.len(), 2);
    assert_eq!(h.transport.last().unwrap().payload["items"][0]["name"], "second");
}

#[test]
fn removing_every_record_sends_the_collection_alone() {
    let mut h = Harness::new();
    let store = rules(&h, &["1", "2"]);
    store
        .with(|s| {
            s.remove(&id("1"))?;
            s.remove(&id("2"))
        })
        .unwrap()
        .unwrap();

    let ids = h.session.save(&store).unwrap();
    assert_eq!(h.transport.last().unwrap().payload, json!({"collection": "store-1"}));

    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    assert!(store.is_empty());
    assert!(store.read(|s| s.removed().is_empty()).unwrap());
    assert!(!store.read(|s| s.has_pending_changes()).unwrap());
}

#[test]
fn removal_during_a_batch_is_sent_with_the_next_one() {
    let mut h = Harness::new();
    let store = rules(&h, &["1", "2"]);
    set(&store, "1", "name", json!("first"));

    let first = h.session.save(&store).unwrap();
    store.with(|s| s.remove(&id("2"))).unwrap().unwrap();
    h.session
        .deliver_response(first[0], json!({"items": [{"success": true}, {"success": true}]}), 5);
    h.session.run_until_idle();

    assert!(!store.contains(&id("2")));
    assert_eq!(store.read(|s| s.removed().len()).unwrap(), 1);
    assert!(store.read(|s| s.has_pending_changes()).unwrap());

    let second = h.session.save(&store).unwrap();
    assert_eq!(second.len(), 1);
    let items = h.transport.last().unwrap().payload["items"].clone();
    assert_eq!(items, json!([{"rule_id": "1", "name": "first"}]));

    h.session
        .deliver_response(second[0], json!({"items": [{"success": true}]}), 6);
    h.session.run_until_idle();
    assert!(store.read(|s| s.removed().is_empty()).unwrap());
    assert!(!store.read(|s| s.has_pending_changes()).unwrap());
}

#[test]
fn new_rule_is_keyed_from_its_batch_result() {
    let mut h = Harness::new();
    let store = rules(&h, &["1"]);
    let key = store
        .with(|s| s.create(map(json!({"name": "new rule"}))))
        .unwrap()
        .unwrap();

    let ids = h.session.save(&store).unwrap();
    let body = json!({"items": [
        {"success": true},
        {"success": true, "item": {"rule_id": "9"}},
    ]});
    h.session.deliver_response(ids[0], body, 5);
    h.session.run_until_idle();

    assert!(!store.contains(&key));
    assert_eq!(field(&store, "9", "name"), Some(json!("new rule")));
    assert_eq!(store.read(|s| s.position(&id("9"))).unwrap(), Some(1));
}

#[test]
fn batched_load_replaces_the_listing() {
    let mut h = Harness::new();
    let store = rules(&h, &["1"]);

    let request = h.session.load(&store, json!({})).unwrap();
    assert_eq!(h.transport.last().unwrap().server_action, "open");
    assert_eq!(h.transport.last().unwrap().payload, json!({"collection": "store-1"}));

    let body = json!({"items": [
        {"rule_id": "4", "name": "four"},
        {"rule_id": "5", "name": "five"},
    ]});
    h.session.deliver_response(request, body, 12);
    h.session.run_until_idle();

    assert!(!store.contains(&id("1")));
    assert_eq!(field(&store, "5", "name"), Some(json!("five")));
    assert_eq!(store.read(|s| s.last_execution_time(Action::Open)).unwrap(), 12);
}
