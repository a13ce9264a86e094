//! The realtime hub.
//!
//! Ties the registry, presence tracker, dispatcher and ingestion pipeline
//! together and implements the connection lifecycle and client signaling.
//!
//! Presence rule: a user is online while they hold at least one live
//! connection and have not sent `chat-leaved` since their last connect or
//! `chat-joined`. Closing one of several connections changes nothing.
//!
//! Presence transitions run under one hub-wide lock, from the registry
//! update through enqueueing the snapshot. Queues are written with
//! `try_send`, so the lock is never held across a wait.

use crate::connection::ConnectionHandle;
use crate::dispatcher::{DeliveryObserver, DeliveryReport, EventDispatcher};
use crate::ingest::{IngestionPipeline, MessageStore, StoreError};
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use huddle_protocol::{ChatId, ClientFrame, Event, OutboundMessage, UserId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Abandon message persistence after this long. `None` waits forever.
    pub persist_timeout: Option<Duration>,
}

/// What handling a client frame produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// A chat message was fanned out.
    Message(OutboundMessage),
    /// A signaling event was delivered.
    Signal(DeliveryReport),
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Users with at least one connection.
    pub connected_users: usize,
    /// Users marked online.
    pub online_users: usize,
}

/// Presence, fan-out and ingestion for one server process.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    presence: PresenceTracker,
    dispatcher: EventDispatcher,
    pipeline: IngestionPipeline,
    store: Arc<dyn MessageStore>,
    transitions: Mutex<()>,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_config(store, HubConfig::default(), None)
    }

    /// Create a hub with custom configuration and an optional delivery observer.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn MessageStore>,
        config: HubConfig,
        observer: Option<Arc<dyn DeliveryObserver>>,
    ) -> Self {
        info!("Creating hub with config: {:?}", config);

        let registry = Arc::new(ConnectionRegistry::new());
        let mut dispatcher = EventDispatcher::new(Arc::clone(&registry));
        if let Some(observer) = observer {
            dispatcher = dispatcher.with_observer(observer);
        }
        let pipeline = IngestionPipeline::new(dispatcher.clone(), Arc::clone(&store))
            .with_persist_timeout(config.persist_timeout);

        Self {
            registry,
            presence: PresenceTracker::new(),
            dispatcher,
            pipeline,
            store,
            transitions: Mutex::new(()),
        }
    }

    fn transition(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The presence tracker.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// The event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.connection_count(),
            connected_users: self.registry.user_count(),
            online_users: self.presence.len(),
        }
    }

    /// Register an admitted connection and mark its user online.
    ///
    /// If the user just came online everyone connected gets the new presence
    /// list; otherwise only the new connection receives the current list.
    /// Connecting an already registered handle does nothing.
    pub fn connect(&self, handle: &ConnectionHandle) -> DeliveryReport {
        let _transition = self.transition();

        if !self.registry.register(handle.clone()) {
            debug!(connection = %handle.id(), "Connection already registered");
            return DeliveryReport::default();
        }

        if self.presence.mark_online(handle.user_id()) {
            self.dispatcher
                .broadcast_all(Event::presence(self.presence.snapshot()))
        } else {
            let event = Arc::new(Event::presence(self.presence.snapshot()));
            match handle.deliver(event) {
                Ok(()) => DeliveryReport {
                    resolved: 1,
                    delivered: 1,
                    dropped: 0,
                },
                Err(_) => DeliveryReport {
                    resolved: 1,
                    delivered: 0,
                    dropped: 1,
                },
            }
        }
    }

    /// Remove a closed connection.
    ///
    /// Presence only changes when this was the user's last connection, and
    /// the new list then goes to everyone still connected.
    pub fn disconnect(&self, handle: &ConnectionHandle) -> DeliveryReport {
        let _transition = self.transition();
        let last = self.registry.unregister(handle);
        debug!(
            connection = %handle.id(),
            user = %handle.user_id(),
            last_connection = last,
            "Connection closed"
        );

        if last && self.presence.mark_offline(handle.user_id()) {
            self.dispatcher
                .broadcast_all(Event::presence(self.presence.snapshot()))
        } else {
            DeliveryReport::default()
        }
    }

    /// Handle a frame received on `handle`.
    pub fn handle_frame(&self, handle: &ConnectionHandle, frame: ClientFrame) -> FrameOutcome {
        match frame {
            ClientFrame::NewMessage {
                chat_id,
                members,
                message,
            } => FrameOutcome::Message(self.send_message(handle, chat_id, message, &members)),
            ClientFrame::TypingStart { chat_id, members } => {
                FrameOutcome::Signal(self.dispatcher.broadcast(&members, Event::typing_start(chat_id)))
            }
            ClientFrame::TypingStop { chat_id, members } => {
                FrameOutcome::Signal(self.dispatcher.broadcast(&members, Event::typing_stop(chat_id)))
            }
            ClientFrame::ChatJoined { members } => FrameOutcome::Signal(self.join(handle, &members)),
            ClientFrame::ChatLeaved { members } => FrameOutcome::Signal(self.leave(handle, &members)),
        }
    }

    /// Send a chat message from the connection's user.
    pub fn send_message(
        &self,
        handle: &ConnectionHandle,
        chat_id: ChatId,
        content: impl Into<String>,
        members: &[UserId],
    ) -> OutboundMessage {
        self.pipeline
            .ingest(chat_id, handle.profile(), content, members)
    }

    /// Mark the connection's user online and send the presence list to `members`.
    pub fn join(&self, handle: &ConnectionHandle, members: &[UserId]) -> DeliveryReport {
        let _transition = self.transition();
        self.presence.mark_online(handle.user_id());
        self.dispatcher
            .broadcast(members, Event::presence(self.presence.snapshot()))
    }

    /// Mark the connection's user offline and send the presence list to `members`.
    pub fn leave(&self, handle: &ConnectionHandle, members: &[UserId]) -> DeliveryReport {
        let _transition = self.transition();
        self.presence.mark_offline(handle.user_id());
        self.dispatcher
            .broadcast(members, Event::presence(self.presence.snapshot()))
    }

    /// Deliver a server-originated event to explicit recipients.
    pub fn notify(&self, recipients: &[UserId], event: Event) -> DeliveryReport {
        self.dispatcher.broadcast(recipients, event)
    }

    /// Deliver a server-originated event to every member of a chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the chat's members cannot be looked up.
    pub async fn notify_chat(&self, chat: &ChatId, event: Event) -> Result<DeliveryReport, StoreError> {
        let members = self.store.find_chat_members(chat).await?;
        Ok(self.dispatcher.broadcast(&members, event))
    }
}
