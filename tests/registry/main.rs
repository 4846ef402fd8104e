#[path = "../support/mod.rs"]
mod support;

use cache_sync::{RegistryEvent, StoreOptions, TransportError};
use serde_json::{json, Value};

use support::{field, id, map, names, record_events, set, Harness};

#[test]
fn registering_twice_rebroadcasts_once() {
    let h = Harness::new();
    let store = h.mail_store(&["E1"]);
    let events = record_events(&h.registry);

    assert!(!h.registry.register(&store));
    assert_eq!(h.registry.len(), 1);

    store.with(|s| s.remove(&id("E1"))).unwrap().unwrap();
    assert_eq!(names(&events), vec!["recordremove"]);
}

#[test]
fn standalone_store_is_invisible() {
    let h = Harness::new();
    let events = record_events(&h.registry);
    let scratch = h.store(StoreOptions::new("mail").standalone(), &[json!({"entryid": "E1"})]);
    let listed = h.mail_store(&["E1"]);

    assert_eq!(h.registry.len(), 1);
    assert!(!h.registry.register(&scratch));
    assert!(!h.registry.is_registered(scratch.id()));
    assert_eq!(h.registry.stores_containing(&[id("E1")]), vec![listed]);

    scratch.with(|s| s.remove(&id("E1"))).unwrap().unwrap();
    assert!(names(&events).is_empty());
}

#[test]
fn unregistered_store_stops_routing() {
    let h = Harness::new();
    let store = h.mail_store(&["E1", "E2"]);
    let events = record_events(&h.registry);

    assert!(h.registry.unregister(&store));
    assert!(!h.registry.unregister(&store));
    store.with(|s| s.remove(&id("E1"))).unwrap().unwrap();
    assert!(names(&events).is_empty());

    assert!(h.registry.register(&store));
    store.with(|s| s.remove(&id("E2"))).unwrap().unwrap();
    assert_eq!(names(&events), vec!["recordremove"]);
}

#[test]
fn destroy_is_idempotent() {
    let h = Harness::new();
    let store = h.mail_store(&["E1"]);

    store.destroy();
    store.destroy();
    assert!(store.is_destroyed());
    assert!(h.registry.is_empty());
    assert!(!h.registry.register(&store));
}

// =============================================================================
// Cross-store propagation
// =============================================================================

#[test]
fn pending_save_is_mirrored_before_it_is_sent() {
    let mut h = Harness::new();
    let inbox = h.mail_store(&["E1"]);
    let search = h.mail_store(&["E1"]);
    let events = record_events(&h.registry);

    set(&inbox, "E1", "subject", json!("edited"));
    h.session.save(&inbox).unwrap();

    assert_eq!(names(&events), vec!["beforerecordsave"]);
    assert_eq!(field(&search, "E1", "subject"), Some(json!("edited")));
}

#[test]
fn server_only_store_waits_for_the_write() {
    let mut h = Harness::new();
    let inbox = h.mail_store(&["E1"]);
    let confirmed = h.store(
        StoreOptions::new("mail").server_only(),
        &[json!({"entryid": "E1", "subject": "subject E1"})],
    );

    set(&inbox, "E1", "subject", json!("edited"));
    let ids = h.session.save(&inbox).unwrap();
    assert_eq!(field(&confirmed, "E1", "subject"), Some(json!("subject E1")));

    let events = record_events(&h.registry);
    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    assert_eq!(field(&confirmed, "E1", "subject"), Some(json!("edited")));
    assert!(names(&events).contains(&"afterrecordwrite"));
    assert!(names(&events).contains(&"afterrecordsave"));
}

#[test]
fn server_only_store_edits_are_not_announced() {
    let mut h = Harness::new();
    let inbox = h.mail_store(&["E1"]);
    let confirmed = h.store(
        StoreOptions::new("mail").server_only(),
        &[json!({"entryid": "E1", "subject": "subject E1"})],
    );
    let events = record_events(&h.registry);

    set(&confirmed, "E1", "subject", json!("direct"));
    let ids = h.session.save(&confirmed).unwrap();
    assert!(!names(&events).contains(&"beforerecordsave"));
    assert_eq!(field(&inbox, "E1", "subject"), Some(json!("subject E1")));

    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.run_until_idle();
    assert_eq!(names(&events), vec!["afterrecordwrite"]);
    assert_eq!(field(&inbox, "E1", "subject"), Some(json!("direct")));
}

#[test]
fn created_record_is_mirrored_into_sibling_collection_store() {
    let mut h = Harness::new();
    let inbox = h.store(StoreOptions::new("mail").with_collection("inbox"), &[]);
    let unread = h.store(StoreOptions::new("mail").with_collection("inbox"), &[]);
    let sent = h.store(StoreOptions::new("mail").with_collection("sent"), &[]);

    let key = inbox
        .with(|s| s.create(map(json!({"parent_entryid": "inbox", "subject": "hi"}))))
        .unwrap()
        .unwrap();
    let ids = h.session.save(&inbox).unwrap();
    h.session
        .deliver_response(ids[0], json!({"item": {"id": key.as_str(), "entryid": "N1"}}), 5);
    h.session.run_until_idle();

    assert_eq!(field(&inbox, "N1", "subject"), Some(json!("hi")));
    assert_eq!(field(&unread, "N1", "subject"), Some(json!("hi")));
    assert!(sent.is_empty());
}

#[test]
fn failed_save_is_reported_as_store_exception() {
    let mut h = Harness::new();
    let inbox = h.mail_store(&["E1"]);
    set(&inbox, "E1", "subject", json!("edited"));
    let ids = h.session.save(&inbox).unwrap();

    let events = record_events(&h.registry);
    h.session
        .deliver_failure(ids[0], TransportError::Rejected("quota".to_string()), 5);
    h.session.run_until_idle();

    let events = events.lock().unwrap();
    match events.as_slice() {
        [RegistryEvent::StoreException { store, error, records, .. }] => {
            assert_eq!(*store, inbox.id());
            assert_eq!(error, "request rejected: quota");
            assert_eq!(records, &vec![id("E1")]);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[cfg(feature = "emitter")]
#[test]
fn emitter_bridge_forwards_write_events() {
    use std::sync::mpsc;
    use std::time::Duration;

    use cache_sync::EmitterBridge;

    let mut h = Harness::new();
    let inbox = h.mail_store(&["E1"]);
    let bridge = EmitterBridge::default();
    bridge.attach(&h.registry);

    let (tx, rx) = mpsc::channel();
    bridge.on("afterrecordwrite", move |payload: String| {
        tx.send(payload).unwrap();
    });

    set(&inbox, "E1", "subject", json!("edited"));
    let ids = h.session.save(&inbox).unwrap();
    h.session.deliver_response(ids[0], json!({"success": true}), 5);
    h.session.run_until_idle();

    let payload = rx
        .recv_timeout(Duration::from_secs(1))
        .expect("afterrecordwrite never fired");
    let value: Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["event"], "afterrecordwrite");
    assert_eq!(value["action"], "update");
    assert_eq!(value["store"], json!(inbox.id().get()));
}
