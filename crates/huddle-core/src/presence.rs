//! Presence tracking for Huddle.
//!
//! The online set is a single ordered set behind one lock, so `mark_online`,
//! `mark_offline` and `snapshot` are linearizable with respect to each other.
//! Which events move a user in or out is decided by the [`Hub`](crate::Hub).

use huddle_protocol::UserId;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The set of users currently considered online.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: RwLock<BTreeSet<UserId>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeSet<UserId>> {
        self.online.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeSet<UserId>> {
        self.online.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a user online.
    ///
    /// Returns `true` only if the user was not online before.
    pub fn mark_online(&self, user: &UserId) -> bool {
        let changed = self.write().insert(user.clone());
        if changed {
            debug!(user = %user, "Presence: user online");
        }
        changed
    }

    /// Mark a user offline.
    ///
    /// Returns `true` only if the user was online before.
    pub fn mark_offline(&self, user: &UserId) -> bool {
        let changed = self.write().remove(user);
        if changed {
            debug!(user = %user, "Presence: user offline");
        }
        changed
    }

    /// Check if a user is online.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.read().contains(user)
    }

    /// Online users, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserId> {
        self.read().iter().cloned().collect()
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
