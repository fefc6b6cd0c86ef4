//! Tests for the Hub
//!
//! These tests drive the hub with in-memory sessions and verify:
//! - Every command's payload and error handling
//! - Namespace isolation
//! - Write-bulk atomicity
//! - Key and prefix fan-out, exactly once per write
//! - Disconnect cleanup
//! - Push backpressure (drop-newest)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tidekv::config::{Config, WalSyncStrategy};
use tidekv::engine::Engine;
use tidekv::error::{Result, TideError};
use tidekv::hub::{
    ClientSession, Delivery, Hub, MemorySession, SendOutcome, SessionInfo, SessionRef, SessionSink,
    SessionState,
};
use tidekv::memtable::MemTable;
use tidekv::protocol::{encode_message, Request, ServerMessage, COMMAND_NAMES, PROTO_VERSION};
use tidekv::storage::Store;
use tidekv::wal::WritePair;

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _temp: TempDir,
    hub: Hub,
}

fn setup_hub() -> Fixture {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 1000 })
        .build();
    let engine = Engine::open(config).unwrap();
    Fixture {
        _temp: temp,
        hub: Hub::new(Arc::new(engine)),
    }
}

fn frame(key: &str) -> bytes::Bytes {
    encode_message(&ServerMessage::push(key, "")).unwrap()
}

/// Register a fresh in-memory session in `namespace`
fn connect(hub: &Hub, namespace: &str) -> Arc<MemorySession> {
    let session = MemorySession::new(namespace, 64);
    hub.register(session.clone()).unwrap();
    session
}

/// Dispatch one request and return its response (pushes are left queued)
fn call(hub: &Hub, session: &Arc<MemorySession>, command: &str, data: Value) -> (bool, Value) {
    let data = match data {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    let session_ref: SessionRef = session.clone();
    hub.dispatch(&session_ref, Request::new(command, data, "req"));

    let mut response = None;
    let mut pushes = Vec::new();
    for message in session.drain().unwrap() {
        match message {
            ServerMessage::Response { ok, data, .. } => response = Some((ok, data)),
            push => pushes.push(push),
        }
    }
    // Put pushes back in order for the caller to inspect
    requeue(session, pushes);
    response.expect("no response")
}

fn requeue(session: &Arc<MemorySession>, pushes: Vec<ServerMessage>) {
    for push in pushes {
        session.send_message(encode_message(&push).unwrap(), Delivery::Reply);
    }
}

fn ok(hub: &Hub, session: &Arc<MemorySession>, command: &str, data: Value) -> Value {
    let (ok, payload) = call(hub, session, command, data);
    assert!(ok, "{} failed: {}", command, payload);
    payload
}

fn err_code(hub: &Hub, session: &Arc<MemorySession>, command: &str, data: Value) -> String {
    let (ok, payload) = call(hub, session, command, data);
    assert!(!ok, "{} unexpectedly succeeded", command);
    payload["error"].as_str().unwrap().to_string()
}

fn pushes(session: &Arc<MemorySession>) -> Vec<(String, String)> {
    session
        .drain()
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::Push { key, value } => Some((key, value)),
            _ => None,
        })
        .collect()
}

fn uid(session: &Arc<MemorySession>) -> String {
    session.identify().uid.clone()
}

fn push(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[test]
fn test_write_then_read_round_trip() {
    let f = setup_hub();
    let s = connect(&f.hub, "app/");

    for (k, v) in [("a", "1"), ("with space", "x y"), ("ünï", "cödé"), ("", "root")] {
        assert_eq!(ok(&f.hub, &s, "write-key", json!({"key": k, "data": v})), Value::Null);
        assert_eq!(ok(&f.hub, &s, "read-key", json!({"key": k})), json!(v));
    }
}

#[test]
fn test_read_absent_key_is_empty_string() {
    let f = setup_hub();
    let s = connect(&f.hub, "fresh/");

    assert_eq!(ok(&f.hub, &s, "read-key", json!({"key": "never"})), json!(""));
}

#[test]
fn test_namespace_isolation() {
    let f = setup_hub();
    let a = connect(&f.hub, "tenant-a/");
    let b = connect(&f.hub, "tenant-b/");

    ok(&f.hub, &a, "write-key", json!({"key": "shared", "data": "from-a"}));
    ok(&f.hub, &b, "write-key", json!({"key": "shared", "data": "from-b"}));

    assert_eq!(ok(&f.hub, &a, "read-key", json!({"key": "shared"})), json!("from-a"));
    assert_eq!(ok(&f.hub, &b, "read-key", json!({"key": "shared"})), json!("from-b"));
    assert_eq!(ok(&f.hub, &a, "list-keys", json!({})), json!(["shared"]));
}

#[test]
fn test_read_bulk_keyed_by_requested_name() {
    let f = setup_hub();
    let s = connect(&f.hub, "ns/");
    ok(&f.hub, &s, "write-bulk", json!({"a": "1", "b": "2"}));

    let payload = ok(&f.hub, &s, "read-bulk", json!({"keys": ["a", "missing", "b"]}));

    assert_eq!(payload, json!({"a": "1", "missing": "", "b": "2"}));
}

#[test]
fn test_read_prefix_returns_suffixes() {
    let f = setup_hub();
    let s = connect(&f.hub, "ns/");
    ok(
        &f.hub,
        &s,
        "write-bulk",
        json!({"user/1": "alice", "user/2": "bob", "users": "no", "admin/1": "eve"}),
    );

    let payload = ok(&f.hub, &s, "read-prefix", json!({"prefix": "user/"}));
    assert_eq!(payload, json!({"1": "alice", "2": "bob"}));

    let payload = ok(&f.hub, &s, "read-prefix", json!({"prefix": "nothing"}));
    assert_eq!(payload, json!({}));
}

#[test]
fn test_list_keys_never_null() {
    let f = setup_hub();
    let s = connect(&f.hub, "empty/");

    assert_eq!(ok(&f.hub, &s, "list-keys", json!({})), json!([]));
    assert_eq!(ok(&f.hub, &s, "list-keys", json!({"prefix": null})), json!([]));

    ok(&f.hub, &s, "write-bulk", json!({"b": "2", "a": "1", "c/d": "3"}));
    assert_eq!(ok(&f.hub, &s, "list-keys", json!({})), json!(["a", "b", "c/d"]));
    assert_eq!(ok(&f.hub, &s, "list-keys", json!({"prefix": "c"})), json!(["c/d"]));
}

#[test]
fn test_proto_version() {
    let f = setup_hub();
    let s = connect(&f.hub, "");

    assert_eq!(ok(&f.hub, &s, "proto-version", json!({})), json!(PROTO_VERSION));
}

#[test]
fn test_command_table_is_complete() {
    let f = setup_hub();
    let mut expected: Vec<&str> = COMMAND_NAMES.to_vec();
    expected.sort_unstable();

    assert_eq!(f.hub.commands().names(), expected);
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_missing_params() {
    let f = setup_hub();
    let s = connect(&f.hub, "");

    assert_eq!(err_code(&f.hub, &s, "read-key", json!({})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "read-key", json!({"key": 7})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "write-key", json!({"key": "k"})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "read-bulk", json!({"keys": "a"})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "read-bulk", json!({"keys": ["a", 1]})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "read-prefix", json!({})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "subscribe-key", json!({})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "subscribe-prefix", json!({"prefix": []})), "missing-param");
    assert_eq!(err_code(&f.hub, &s, "list-keys", json!({"prefix": 3})), "missing-param");

    let (_, payload) = call(&f.hub, &s, "read-key", json!({}));
    assert!(payload["message"].as_str().unwrap().contains("'key'"));
}

#[test]
fn test_unknown_command_keeps_session() {
    let f = setup_hub();
    let s = connect(&f.hub, "");

    assert_eq!(err_code(&f.hub, &s, "drop-table", json!({})), "unrecognized-command");
    assert_eq!(ok(&f.hub, &s, "read-key", json!({"key": "x"})), json!(""));
    assert!(f.hub.is_registered(&uid(&s)));
}

#[test]
fn test_write_bulk_atomic_on_invalid_value() {
    let f = setup_hub();
    let s = connect(&f.hub, "ns/");

    let code = err_code(
        &f.hub,
        &s,
        "write-bulk",
        json!({"a": "1", "b": 2, "c": "3"}),
    );

    assert_eq!(code, "invalid-format");
    assert_eq!(ok(&f.hub, &s, "list-keys", json!({})), json!([]));
    assert_eq!(ok(&f.hub, &s, "read-key", json!({"key": "a"})), json!(""));
}

#[test]
fn test_response_carries_request_id() {
    let f = setup_hub();
    let s = connect(&f.hub, "");
    let session_ref: SessionRef = s.clone();

    f.hub.dispatch(&session_ref, Request::new("proto-version", Default::default(), "abc-42"));

    match s.drain().unwrap().pop() {
        Some(ServerMessage::Response { request_id, ok, .. }) => {
            assert!(ok);
            assert_eq!(request_id, "abc-42");
        }
        other => panic!("expected response, got {:?}", other),
    }
}

/// Store whose writes can be made to fail
struct FlakyStore {
    table: MemTable,
    fail_writes: AtomicBool,
}

impl Store for FlakyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table.get(key))
    }

    fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        Ok(keys.iter().map(|k| self.table.get(k)).collect())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<WritePair>> {
        let view = self.table.view();
        Ok(view
            .scan_prefix(prefix)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }

    fn list_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let view = self.table.view();
        Ok(view.scan_prefix(prefix).map(|(k, _)| k.to_vec()).collect())
    }

    fn set_many(&self, writes: Vec<WritePair>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TideError::Storage("disk full".to_string()));
        }
        self.table.apply(writes);
        Ok(())
    }
}

#[test]
fn test_storage_failure_is_server_error() {
    let store = Arc::new(FlakyStore {
        table: MemTable::new(),
        fail_writes: AtomicBool::new(true),
    });
    let hub = Hub::new(store.clone());
    let writer = connect(&hub, "");
    let watcher = connect(&hub, "");
    ok(&hub, &watcher, "subscribe-key", json!({"key": "k"}));

    let (okay, payload) = call(&hub, &writer, "write-key", json!({"key": "k", "data": "v"}));
    assert!(!okay);
    assert_eq!(payload["error"], json!("server-error"));
    assert!(payload["message"].as_str().unwrap().contains("disk full"));

    // Failed commits notify nobody
    assert!(pushes(&watcher).is_empty());

    store.fail_writes.store(false, Ordering::SeqCst);
    ok(&hub, &writer, "write-key", json!({"key": "k", "data": "v"}));
    assert_eq!(pushes(&watcher), vec![push("k", "v")]);
}

// =============================================================================
// Fan-out Tests
// =============================================================================

#[test]
fn test_key_subscription_one_push_per_write() {
    let f = setup_hub();
    let writer = connect(&f.hub, "ns/");
    let watcher = connect(&f.hub, "ns/");
    ok(&f.hub, &watcher, "subscribe-key", json!({"key": "k"}));

    ok(&f.hub, &writer, "write-key", json!({"key": "k", "data": "1"}));
    ok(&f.hub, &writer, "write-key", json!({"key": "other", "data": "x"}));
    ok(&f.hub, &writer, "write-key", json!({"key": "k", "data": "2"}));

    assert_eq!(pushes(&watcher), vec![push("k", "1"), push("k", "2")]);
    assert!(pushes(&writer).is_empty());
}

#[test]
fn test_unsubscribe_stops_pushes() {
    let f = setup_hub();
    let s = connect(&f.hub, "");
    ok(&f.hub, &s, "subscribe-key", json!({"key": "k"}));
    ok(&f.hub, &s, "write-key", json!({"key": "k", "data": "1"}));
    ok(&f.hub, &s, "unsubscribe-key", json!({"key": "k"}));
    ok(&f.hub, &s, "write-key", json!({"key": "k", "data": "2"}));

    // A writer subscribed to its own key is notified too
    assert_eq!(pushes(&s), vec![push("k", "1")]);
}

#[test]
fn test_idempotent_subscribe_single_push() {
    let f = setup_hub();
    let s = connect(&f.hub, "");
    ok(&f.hub, &s, "subscribe-key", json!({"key": "k"}));
    ok(&f.hub, &s, "subscribe-key", json!({"key": "k"}));
    ok(&f.hub, &s, "subscribe-prefix", json!({"prefix": "k"}));
    ok(&f.hub, &s, "subscribe-prefix", json!({"prefix": ""}));

    ok(&f.hub, &s, "write-key", json!({"key": "k", "data": "v"}));

    assert_eq!(pushes(&s), vec![push("k", "v")]);
}

#[test]
fn test_prefix_subscription() {
    let f = setup_hub();
    let writer = connect(&f.hub, "ns/");
    let watcher = connect(&f.hub, "ns/");
    ok(&f.hub, &watcher, "subscribe-prefix", json!({"prefix": "user/"}));

    ok(
        &f.hub,
        &writer,
        "write-bulk",
        json!({"user/1": "a", "users": "no", "admin": "no"}),
    );
    ok(&f.hub, &writer, "write-key", json!({"key": "user/2", "data": "b"}));
    ok(&f.hub, &writer, "write-key", json!({"key": "user/1", "data": "c"}));

    assert_eq!(
        pushes(&watcher),
        vec![push("user/1", "a"), push("user/2", "b"), push("user/1", "c")]
    );

    ok(&f.hub, &watcher, "unsubscribe-prefix", json!({"prefix": "user/"}));
    ok(&f.hub, &writer, "write-key", json!({"key": "user/3", "data": "d"}));
    assert!(pushes(&watcher).is_empty());
}

#[test]
fn test_push_keys_relative_to_subscriber_namespace() {
    let f = setup_hub();
    let writer = connect(&f.hub, "app/");
    let same_ns = connect(&f.hub, "app/");
    let other_ns = connect(&f.hub, "other/");
    ok(&f.hub, &same_ns, "subscribe-key", json!({"key": "k"}));
    ok(&f.hub, &other_ns, "subscribe-key", json!({"key": "k"}));

    ok(&f.hub, &writer, "write-key", json!({"key": "k", "data": "v"}));

    assert_eq!(pushes(&same_ns), vec![push("k", "v")]);
    assert!(pushes(&other_ns).is_empty());
}

#[test]
fn test_disconnect_cleanup() {
    let f = setup_hub();
    let writer = connect(&f.hub, "");
    let gone = connect(&f.hub, "");
    ok(&f.hub, &gone, "subscribe-key", json!({"key": "k"}));
    ok(&f.hub, &gone, "subscribe-prefix", json!({"prefix": "k"}));

    let gone_uid = uid(&gone);
    assert!(f.hub.unregister(&gone_uid));
    assert!(!f.hub.unregister(&gone_uid));
    assert!(f.hub.registry().subscriptions_of(&gone_uid).is_none());

    let fresh = connect(&f.hub, "");
    ok(&f.hub, &fresh, "subscribe-key", json!({"key": "k"}));
    ok(&f.hub, &writer, "write-key", json!({"key": "k", "data": "v"}));

    assert!(pushes(&gone).is_empty());
    assert_eq!(pushes(&fresh), vec![push("k", "v")]);
    assert_eq!(f.hub.stats().pushes_delivered, 1);
}

#[test]
fn test_register_rejects_duplicate() {
    let f = setup_hub();
    let s = connect(&f.hub, "");

    assert!(matches!(
        f.hub.register(s.clone()),
        Err(TideError::DuplicateSession(_))
    ));
    assert_eq!(f.hub.session_count(), 1);
}

#[test]
fn test_full_buffer_drops_newest_push() {
    let f = setup_hub();
    let writer = connect(&f.hub, "");
    let slow = MemorySession::new("", 2);
    f.hub.register(slow.clone()).unwrap();
    f.hub
        .registry()
        .subscribe_prefix(&uid(&slow), b"")
        .unwrap();

    for i in 0..5 {
        ok(&f.hub, &writer, "write-key", json!({"key": "k", "data": i.to_string()}));
    }

    assert_eq!(pushes(&slow), vec![push("k", "0"), push("k", "1")]);
    let stats = f.hub.stats();
    assert_eq!(stats.pushes_delivered, 2);
    assert_eq!(stats.pushes_dropped, 3);
}

#[test]
fn test_concurrent_writers_each_push_once() {
    let f = setup_hub();
    let hub = Arc::new(f.hub);
    let watcher = MemorySession::new("", 10_000);
    hub.register(watcher.clone()).unwrap();
    hub.registry()
        .subscribe_prefix(&uid(&watcher), b"t")
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                let session = MemorySession::new("", 16);
                hub.register(session.clone()).unwrap();
                for i in 0..50 {
                    let key = format!("t{}/{}", t, i);
                    let (okay, _) = call(&hub, &session, "write-key", json!({"key": key, "data": "v"}));
                    assert!(okay);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let received = pushes(&watcher);
    assert_eq!(received.len(), 200);

    // Per-writer order is preserved
    for t in 0..4 {
        let keys: Vec<String> = received
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("t{}/", t)))
            .map(|(k, _)| k.clone())
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("t{}/{}", t, i)).collect();
        assert_eq!(keys, expected);
    }
}

// =============================================================================
// Client Session Tests
// =============================================================================

#[test]
fn test_client_session_lifecycle() {
    let (session, outbound) =
        ClientSession::new(SessionInfo::new("ns/"), 4, Duration::from_millis(50));
    assert_eq!(session.state(), SessionState::Connected);

    session.activate();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.send_message(frame("a"), Delivery::Reply), SendOutcome::Sent);
    assert!(outbound.next_frame().is_some());

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closing);
    assert!(outbound.next_frame().is_none());
    assert_eq!(
        session.send_message(frame("b"), Delivery::Push),
        SendOutcome::Disconnected
    );

    session.mark_removed();
    assert_eq!(session.state(), SessionState::Removed);
    // Removed is terminal
    session.activate();
    assert_eq!(session.state(), SessionState::Removed);
}

#[test]
fn test_client_session_flushes_queued_frames_after_close() {
    let (session, outbound) =
        ClientSession::new(SessionInfo::new(""), 4, Duration::from_millis(50));
    session.activate();

    assert_eq!(session.send_message(frame("a"), Delivery::Push), SendOutcome::Sent);
    assert_eq!(session.send_message(frame("err"), Delivery::Reply), SendOutcome::Sent);
    session.close();

    assert_eq!(outbound.next_frame(), Some(frame("a")));
    assert_eq!(outbound.next_frame(), Some(frame("err")));
    assert_eq!(outbound.next_frame(), None);
}

#[test]
fn test_client_session_backpressure() {
    let (session, _outbound) =
        ClientSession::new(SessionInfo::new(""), 2, Duration::from_millis(50));
    session.activate();

    assert_eq!(session.send_message(frame("1"), Delivery::Push), SendOutcome::Sent);
    assert_eq!(session.send_message(frame("2"), Delivery::Push), SendOutcome::Sent);
    assert_eq!(session.send_message(frame("3"), Delivery::Push), SendOutcome::BufferFull);
    assert_eq!(session.pushes_dropped(), 1);

    // A reply that cannot be queued in time closes the stalled session
    assert_eq!(session.send_message(frame("r"), Delivery::Reply), SendOutcome::TimedOut);
    assert!(session.is_closed());
}
