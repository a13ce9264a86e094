//! Connection registry.
//!
//! Maps each user to the set of their live connection handles. The map is
//! sharded (`DashMap`), and every operation touches a user's set under that
//! shard's lock, so no caller ever sees a half-updated set.

use crate::connection::{ConnectionHandle, ConnectionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_protocol::UserId;
use std::collections::hash_map;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Registry of live connections, keyed by owning user.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// user -> (connection id -> handle). Empty sets are never retained.
    connections: DashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
    /// Total number of registered handles.
    total: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its owning user.
    ///
    /// Returns `true` if the handle was added, `false` if it was already
    /// registered.
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let user = handle.user_id().clone();
        let mut handles = self.connections.entry(user.clone()).or_default();

        match handles.entry(handle.id().clone()) {
            hash_map::Entry::Occupied(_) => false,
            hash_map::Entry::Vacant(slot) => {
                let connection = slot.key().clone();
                slot.insert(handle);
                self.total.fetch_add(1, Ordering::Relaxed);
                debug!(
                    user = %user,
                    connection = %connection,
                    handles = handles.len(),
                    "Connection registered"
                );
                true
            }
        }
    }

    /// Remove a handle.
    ///
    /// Returns `true` only when this removed the user's last handle, in which
    /// case the user's entry is gone as well.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        match self.connections.entry(handle.user_id().clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(handle.id()).is_none() {
                    return false;
                }
                self.total.fetch_sub(1, Ordering::Relaxed);

                let remaining = entry.get().len();
                debug!(
                    user = %handle.user_id(),
                    connection = %handle.id(),
                    remaining,
                    "Connection unregistered"
                );

                if remaining == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Resolve users to their live handles.
    ///
    /// Unknown users contribute nothing. Each handle appears at most once,
    /// even if a user is listed twice.
    pub fn resolve<'a, I>(&self, users: I) -> Vec<ConnectionHandle>
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for user in users {
            if !seen.insert(user) {
                continue;
            }
            if let Some(entry) = self.connections.get(user) {
                handles.extend(entry.values().cloned());
            }
        }

        handles
    }

    /// Handles currently registered for one user.
    #[must_use]
    pub fn handles_of(&self, user: &UserId) -> Vec<ConnectionHandle> {
        self.resolve(std::iter::once(user))
    }

    /// Whether the user has at least one live handle.
    #[must_use]
    pub fn is_connected(&self, user: &UserId) -> bool {
        self.connections.contains_key(user)
    }

    /// All users with at least one live handle.
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered handles.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Number of users with at least one handle.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbox;
    use huddle_protocol::UserProfile;

    fn handle(user: &str, id: &str) -> (ConnectionHandle, Outbox) {
        ConnectionHandle::with_id(id.into(), UserProfile::new(user, user.to_uppercase()), 8)
    }

    fn ids(handles: &[ConnectionHandle]) -> Vec<String> {
        let mut ids: Vec<String> = handles.iter().map(|h| h.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx) = handle("alice", "conn-1");

        assert!(registry.register(h1.clone()));
        assert!(!registry.register(h1.clone()));

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(ids(&registry.handles_of(&"alice".into())), vec!["conn-1"]);
    }

    #[test]
    fn test_unregister_reports_last_handle() {
        let registry = ConnectionRegistry::new();
        let (phone, _rx1) = handle("alice", "phone");
        let (laptop, _rx2) = handle("alice", "laptop");

        registry.register(phone.clone());
        registry.register(laptop.clone());

        assert!(!registry.unregister(&phone));
        assert!(registry.is_connected(&"alice".into()));

        assert!(registry.unregister(&laptop));
        assert!(!registry.is_connected(&"alice".into()));
        assert_eq!(registry.user_count(), 0);
        assert_eq!(registry.connection_count(), 0);

        // Already gone
        assert!(!registry.unregister(&laptop));
    }

    #[test]
    fn test_register_unregister_sequences() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = handle("alice", "a");
        let (b, _rx_b) = handle("alice", "b");

        registry.register(a.clone());
        registry.register(b.clone());
        registry.unregister(&a);
        registry.register(a.clone());
        registry.register(a.clone());
        registry.unregister(&b);
        registry.unregister(&b);

        assert_eq!(ids(&registry.handles_of(&"alice".into())), vec!["a"]);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_resolve_union_without_duplicates() {
        let registry = ConnectionRegistry::new();
        let (a1, _r1) = handle("alice", "a1");
        let (a2, _r2) = handle("alice", "a2");
        let (b1, _r3) = handle("bob", "b1");
        registry.register(a1);
        registry.register(a2);
        registry.register(b1);

        let users: Vec<UserId> = vec!["alice".into(), "bob".into(), "alice".into(), "carol".into()];
        let resolved = registry.resolve(&users);

        assert_eq!(ids(&resolved), vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn test_resolve_unknown_users() {
        let registry = ConnectionRegistry::new();
        let users: Vec<UserId> = vec!["nobody".into()];
        assert!(registry.resolve(&users).is_empty());
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());

        let workers: Vec<_> = (0..8)
            .map(|w| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut keep = Vec::new();
                    for i in 0..200 {
                        let (h, rx) = handle("shared", &format!("w{w}-{i}"));
                        registry.register(h.clone());
                        if i % 2 == 0 {
                            registry.unregister(&h);
                        } else {
                            keep.push((h, rx));
                        }
                    }
                    keep
                })
            })
            .collect();

        let kept: usize = workers.into_iter().map(|w| w.join().unwrap().len()).sum();

        assert_eq!(kept, 8 * 100);
        assert_eq!(registry.connection_count(), kept);
        assert_eq!(registry.handles_of(&"shared".into()).len(), kept);
    }
}
