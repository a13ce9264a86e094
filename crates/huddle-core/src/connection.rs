//! Connection handles.
//!
//! A handle is one live transport connection (a device or a tab). It owns the
//! sending half of a bounded queue; the connection's writer task drains the
//! other half, so delivering to a handle never waits on the network.

use huddle_protocol::{Event, UserId, UserProfile};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default capacity of a handle's outbound queue.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Receiving half of a handle's outbound queue.
pub type Outbox = mpsc::Receiver<Arc<Event>>;

/// Why an event could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection is not draining its queue fast enough.
    #[error("Outbound queue full")]
    Full,

    /// The connection's writer is gone.
    #[error("Connection closed")]
    Closed,
}

/// A registered, authenticated connection.
///
/// The owning user is fixed at admission and never changes. Clones share the
/// same queue; equality and hashing use the connection ID only.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: Arc<UserProfile>,
    sender: mpsc::Sender<Arc<Event>>,
}

impl ConnectionHandle {
    /// Create a handle for `user` with a fresh ID and its outbound queue.
    #[must_use]
    pub fn new(user: UserProfile, capacity: usize) -> (Self, Outbox) {
        Self::with_id(ConnectionId::generate(), user, capacity)
    }

    /// Create a handle with a specific ID.
    #[must_use]
    pub fn with_id(id: ConnectionId, user: UserProfile, capacity: usize) -> (Self, Outbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            user: Arc::new(user),
            sender,
        };
        (handle, receiver)
    }

    /// The connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The owning user's ID.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// The owning user's profile.
    #[must_use]
    pub fn profile(&self) -> &UserProfile {
        &self.user
    }

    /// Queue an event for this connection without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Full`] if the queue is at capacity and
    /// [`DeliveryError::Closed`] if the writer has gone away.
    pub fn deliver(&self, event: Arc<Event>) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Whether the writer side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user", &self.user.id)
            .finish()
    }
}
