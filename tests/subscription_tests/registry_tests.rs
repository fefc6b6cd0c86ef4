//! Tests for the subscription registry
//!
//! These tests verify:
//! - Session registration rules
//! - Key and prefix subscribe/unsubscribe idempotence
//! - Matching: exact keys, every prefix, each session once
//! - Disconnect cleanup
//! - Concurrent subscribe/match/remove

use std::sync::Arc;
use std::thread;

use tidekv::error::TideError;
use tidekv::hub::{MemorySession, SessionInfo, SessionRef};
use tidekv::subscription::{RegistryStats, SessionSubscriptions, SubscriptionRegistry};

// =============================================================================
// Helper Functions
// =============================================================================

fn session(uid: &str) -> SessionRef {
    MemorySession::with_info(SessionInfo::with_uid(uid, ""), 16)
}

fn registry_with(uids: &[&str]) -> SubscriptionRegistry {
    let registry = SubscriptionRegistry::new();
    for uid in uids {
        registry.register_session(session(uid)).unwrap();
    }
    registry
}

fn matched_uids(registry: &SubscriptionRegistry, key: &[u8]) -> Vec<String> {
    let mut uids: Vec<String> = registry
        .matching_subscribers(key)
        .iter()
        .map(|s| s.identify().uid.clone())
        .collect();
    uids.sort();
    uids
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_register_rejects_duplicate_uid() {
    let registry = registry_with(&["a"]);

    assert!(registry.is_registered("a"));
    assert!(matches!(
        registry.register_session(session("a")),
        Err(TideError::DuplicateSession(_))
    ));
}

#[test]
fn test_subscribe_requires_registration() {
    let registry = SubscriptionRegistry::new();

    assert!(matches!(
        registry.subscribe_key("ghost", b"k"),
        Err(TideError::SessionClosed(_))
    ));
    assert!(matches!(
        registry.subscribe_prefix("ghost", b"p"),
        Err(TideError::SessionClosed(_))
    ));
}

// =============================================================================
// Subscribe / Unsubscribe Tests
// =============================================================================

#[test]
fn test_subscribe_key_is_idempotent() {
    let registry = registry_with(&["a"]);

    assert!(registry.subscribe_key("a", b"k").unwrap());
    assert!(!registry.subscribe_key("a", b"k").unwrap());

    assert_eq!(matched_uids(&registry, b"k"), vec!["a"]);
    assert_eq!(registry.stats().keys, 1);
}

#[test]
fn test_unsubscribe_unknown_is_noop() {
    let registry = registry_with(&["a"]);

    assert!(!registry.unsubscribe_key("a", b"never"));
    assert!(!registry.unsubscribe_prefix("a", b"never"));
    assert!(!registry.unsubscribe_key("ghost", b"k"));
}

#[test]
fn test_unsubscribe_stops_matching() {
    let registry = registry_with(&["a"]);
    registry.subscribe_key("a", b"k").unwrap();
    registry.subscribe_prefix("a", b"p/").unwrap();

    assert!(registry.unsubscribe_key("a", b"k"));
    assert!(registry.unsubscribe_prefix("a", b"p/"));

    assert!(registry.matching_subscribers(b"k").is_empty());
    assert!(registry.matching_subscribers(b"p/x").is_empty());
    assert_eq!(
        registry.stats(),
        RegistryStats {
            sessions: 1,
            keys: 0,
            prefixes: 0
        }
    );
}

// =============================================================================
// Matching Tests
// =============================================================================

#[test]
fn test_prefix_matches_only_keys_starting_with_it() {
    let registry = registry_with(&["a"]);
    registry.subscribe_prefix("a", b"user/").unwrap();

    assert_eq!(matched_uids(&registry, b"user/1"), vec!["a"]);
    assert_eq!(matched_uids(&registry, b"user/"), vec!["a"]);
    assert!(matched_uids(&registry, b"users").is_empty());
    assert!(matched_uids(&registry, b"use").is_empty());
}

#[test]
fn test_empty_prefix_matches_everything() {
    let registry = registry_with(&["a"]);
    registry.subscribe_prefix("a", b"").unwrap();

    assert_eq!(matched_uids(&registry, b""), vec!["a"]);
    assert_eq!(matched_uids(&registry, b"anything"), vec!["a"]);
}

#[test]
fn test_session_matched_once_across_key_and_prefixes() {
    let registry = registry_with(&["a", "b"]);
    registry.subscribe_key("a", b"x/y").unwrap();
    registry.subscribe_prefix("a", b"x").unwrap();
    registry.subscribe_prefix("a", b"x/").unwrap();
    registry.subscribe_prefix("a", b"x/y").unwrap();
    registry.subscribe_prefix("b", b"x/").unwrap();

    assert_eq!(matched_uids(&registry, b"x/y"), vec!["a", "b"]);
    assert_eq!(matched_uids(&registry, b"x/z"), vec!["a", "b"]);
    assert_eq!(matched_uids(&registry, b"xz"), vec!["a"]);
}

#[test]
fn test_matching_with_many_prefixes() {
    // More prefixes than the key has candidate prefixes
    let registry = registry_with(&["a", "b"]);
    for i in 0..32 {
        registry
            .subscribe_prefix("b", format!("other{}/", i).as_bytes())
            .unwrap();
    }
    registry.subscribe_prefix("a", b"k").unwrap();

    assert_eq!(matched_uids(&registry, b"key"), vec!["a"]);
    assert_eq!(matched_uids(&registry, b"other7/x"), vec!["b"]);
}

// =============================================================================
// Cleanup Tests
// =============================================================================

#[test]
fn test_remove_session_purges_everything() {
    let registry = registry_with(&["a", "b"]);
    registry.subscribe_key("a", b"k").unwrap();
    registry.subscribe_prefix("a", b"p").unwrap();
    registry.subscribe_key("b", b"k").unwrap();

    assert!(registry.remove_session("a"));
    assert!(!registry.remove_session("a"));

    assert_eq!(matched_uids(&registry, b"k"), vec!["b"]);
    assert!(registry.matching_subscribers(b"p1").is_empty());
    assert_eq!(registry.subscriptions_of("a"), None);
    assert_eq!(
        registry.stats(),
        RegistryStats {
            sessions: 1,
            keys: 1,
            prefixes: 0
        }
    );

    // A removed session cannot subscribe again
    assert!(registry.subscribe_key("a", b"k").is_err());
}

#[test]
fn test_subscriptions_of_sorted() {
    let registry = registry_with(&["a"]);
    registry.subscribe_key("a", b"z").unwrap();
    registry.subscribe_key("a", b"b").unwrap();
    registry.subscribe_prefix("a", b"p").unwrap();

    assert_eq!(
        registry.subscriptions_of("a"),
        Some(SessionSubscriptions {
            keys: vec![b"b".to_vec(), b"z".to_vec()],
            prefixes: vec![b"p".to_vec()],
        })
    );
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_subscribe_match_remove() {
    let registry = Arc::new(SubscriptionRegistry::new());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..100 {
                    let uid = format!("s{}-{}", t, i);
                    registry.register_session(session(&uid)).unwrap();
                    registry.subscribe_key(&uid, b"shared").unwrap();
                    registry.subscribe_prefix(&uid, b"sh").unwrap();
                    let matched = registry.matching_subscribers(b"shared");
                    assert!(matched.iter().any(|s| s.identify().uid == uid));
                    assert!(registry.remove_session(&uid));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.stats(), RegistryStats::default());
}
