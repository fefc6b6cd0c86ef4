//! Subscription registry
//!
//! # Thread Safety
//!
//! Both maps and the per-session ownership index live behind ONE mutex, so a
//! subscribe, an unsubscribe, a disconnect and a match never observe each
//! other half-done. Matching only collects session handles under the lock;
//! frames are sent after it is released.
//!
//! # Prefix Matching
//!
//! Prefixes are kept in a hash map. A written key of length `n` has `n + 1`
//! candidate prefixes, so matching either probes each of them or walks the
//! subscribed prefixes, whichever set is smaller. A byte trie would give the
//! same O(key length) bound without the hashing; it is not needed at the
//! subscriber counts this serves.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::{Result, TideError};
use crate::hub::SessionRef;

/// Session uid → handle
type Subscribers = HashMap<String, SessionRef>;

/// Registry mapping keys and prefixes to subscribed sessions
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// Exact key → subscribers
    keys: HashMap<Vec<u8>, Subscribers>,
    /// Prefix → subscribers
    prefixes: HashMap<Vec<u8>, Subscribers>,
    /// Registered sessions and what each one owns (for cleanup)
    owners: HashMap<String, Owned>,
}

struct Owned {
    session: SessionRef,
    keys: HashSet<Vec<u8>>,
    prefixes: HashSet<Vec<u8>>,
}

#[derive(Clone, Copy)]
enum Kind {
    Key,
    Prefix,
}

/// A session's current subscriptions, sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSubscriptions {
    pub keys: Vec<Vec<u8>>,
    pub prefixes: Vec<Vec<u8>>,
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered sessions
    pub sessions: usize,
    /// Distinct subscribed keys
    pub keys: usize,
    /// Distinct subscribed prefixes
    pub prefixes: usize,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Make a session eligible for subscriptions
    pub fn register_session(&self, session: SessionRef) -> Result<()> {
        let uid = session.identify().uid.clone();
        let mut state = self.state.lock();
        if state.owners.contains_key(&uid) {
            return Err(TideError::DuplicateSession(uid));
        }
        state.owners.insert(
            uid,
            Owned {
                session,
                keys: HashSet::new(),
                prefixes: HashSet::new(),
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, uid: &str) -> bool {
        self.state.lock().owners.contains_key(uid)
    }

    /// Subscribe to one key. Returns `false` if already subscribed.
    ///
    /// Fails with `SessionClosed` if the session is not (or no longer) registered.
    pub fn subscribe_key(&self, uid: &str, key: &[u8]) -> Result<bool> {
        self.state.lock().add(uid, key, Kind::Key)
    }

    /// Subscribe to every key starting with `prefix`. Returns `false` if already subscribed.
    pub fn subscribe_prefix(&self, uid: &str, prefix: &[u8]) -> Result<bool> {
        self.state.lock().add(uid, prefix, Kind::Prefix)
    }

    /// Returns `true` if a subscription was removed
    pub fn unsubscribe_key(&self, uid: &str, key: &[u8]) -> bool {
        self.state.lock().remove(uid, key, Kind::Key)
    }

    /// Returns `true` if a subscription was removed
    pub fn unsubscribe_prefix(&self, uid: &str, prefix: &[u8]) -> bool {
        self.state.lock().remove(uid, prefix, Kind::Prefix)
    }

    /// Every session interested in a write to `key`, each exactly once
    ///
    /// Union of the exact-key subscribers and the subscribers of every prefix
    /// of `key` (including the empty prefix and `key` itself).
    pub fn matching_subscribers(&self, key: &[u8]) -> Vec<SessionRef> {
        let state = self.state.lock();
        let mut sources: Vec<&Subscribers> = Vec::new();

        if let Some(subs) = state.keys.get(key) {
            sources.push(subs);
        }

        if state.prefixes.len() <= key.len() + 1 {
            for (prefix, subs) in &state.prefixes {
                if key.starts_with(prefix) {
                    sources.push(subs);
                }
            }
        } else {
            for end in 0..=key.len() {
                if let Some(subs) = state.prefixes.get(&key[..end]) {
                    sources.push(subs);
                }
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut matched = Vec::new();
        for subs in sources {
            for (uid, session) in subs {
                if seen.insert(uid.as_str()) {
                    matched.push(session.clone());
                }
            }
        }
        matched
    }

    /// Purge every subscription of a session and forget it
    ///
    /// Idempotent: returns `false` if the session was not registered.
    pub fn remove_session(&self, uid: &str) -> bool {
        let mut state = self.state.lock();
        let Some(owned) = state.owners.remove(uid) else {
            return false;
        };

        for key in &owned.keys {
            detach(&mut state.keys, key, uid);
        }
        for prefix in &owned.prefixes {
            detach(&mut state.prefixes, prefix, uid);
        }

        tracing::debug!(
            client = %uid,
            keys = owned.keys.len(),
            prefixes = owned.prefixes.len(),
            "purged session subscriptions"
        );
        true
    }

    /// What a session is subscribed to (`None` if not registered)
    pub fn subscriptions_of(&self, uid: &str) -> Option<SessionSubscriptions> {
        let state = self.state.lock();
        let owned = state.owners.get(uid)?;
        let mut keys: Vec<Vec<u8>> = owned.keys.iter().cloned().collect();
        let mut prefixes: Vec<Vec<u8>> = owned.prefixes.iter().cloned().collect();
        keys.sort();
        prefixes.sort();
        Some(SessionSubscriptions { keys, prefixes })
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            sessions: state.owners.len(),
            keys: state.keys.len(),
            prefixes: state.prefixes.len(),
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryState {
    fn add(&mut self, uid: &str, target: &[u8], kind: Kind) -> Result<bool> {
        let owned = self
            .owners
            .get_mut(uid)
            .ok_or_else(|| TideError::SessionClosed(uid.to_string()))?;

        let (owned_set, map) = match kind {
            Kind::Key => (&mut owned.keys, &mut self.keys),
            Kind::Prefix => (&mut owned.prefixes, &mut self.prefixes),
        };
        if !owned_set.insert(target.to_vec()) {
            return Ok(false);
        }

        map.entry(target.to_vec())
            .or_default()
            .insert(uid.to_string(), owned.session.clone());
        Ok(true)
    }

    fn remove(&mut self, uid: &str, target: &[u8], kind: Kind) -> bool {
        let Some(owned) = self.owners.get_mut(uid) else {
            return false;
        };

        let (owned_set, map) = match kind {
            Kind::Key => (&mut owned.keys, &mut self.keys),
            Kind::Prefix => (&mut owned.prefixes, &mut self.prefixes),
        };
        if !owned_set.remove(target) {
            return false;
        }

        detach(map, target, uid);
        true
    }
}

/// Remove one subscriber from a map entry, dropping the entry when empty
fn detach(map: &mut HashMap<Vec<u8>, Subscribers>, target: &[u8], uid: &str) {
    if let Some(subs) = map.get_mut(target) {
        subs.remove(uid);
        if subs.is_empty() {
            map.remove(target);
        }
    }
}
