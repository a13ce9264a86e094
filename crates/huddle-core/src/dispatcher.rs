//! Event fan-out.
//!
//! The dispatcher resolves recipients through the registry and hands one
//! shared event to each handle's queue. Queues are bounded and written with
//! `try_send`, so a stalled connection loses events instead of holding up
//! the caller or the other recipients.

use crate::connection::DeliveryError;
use crate::ingest::StoreError;
use crate::registry::ConnectionRegistry;
use huddle_protocol::{Event, EventKind, UserId};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handles the recipients resolved to.
    pub resolved: usize,
    /// Handles the event was queued on.
    pub delivered: usize,
    /// Handles whose queue was full or closed.
    pub dropped: usize,
}

impl DeliveryReport {
    /// No live handle was found for any recipient.
    #[must_use]
    pub fn is_gap(&self) -> bool {
        self.resolved == 0
    }

    /// Sum of two reports.
    #[must_use]
    pub fn merge(self, other: DeliveryReport) -> DeliveryReport {
        DeliveryReport {
            resolved: self.resolved + other.resolved,
            delivered: self.delivered + other.delivered,
            dropped: self.dropped + other.dropped,
        }
    }
}

/// Receives the outcome of every broadcast, e.g. to export metrics.
pub trait DeliveryObserver: Send + Sync {
    /// Called once per broadcast, after delivery.
    fn observe(&self, kind: EventKind, report: &DeliveryReport);

    /// Called when a message could not be persisted, timeouts included.
    fn persist_failed(&self, _error: &StoreError) {}
}

/// Delivers events to the live connections of a set of users.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
    observer: Option<Arc<dyn DeliveryObserver>>,
}

impl EventDispatcher {
    /// Create a dispatcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            observer: None,
        }
    }

    /// Report every broadcast to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The observer broadcasts are reported to.
    #[must_use]
    pub fn observer(&self) -> Option<&Arc<dyn DeliveryObserver>> {
        self.observer.as_ref()
    }

    /// The registry recipients are resolved against.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `event` to every live connection of `recipients`.
    ///
    /// Users without connections are skipped silently; a failure on one
    /// connection does not affect the others.
    pub fn broadcast<'a, I>(&self, recipients: I, event: Event) -> DeliveryReport
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        self.broadcast_shared(recipients, Arc::new(event))
    }

    /// Like [`broadcast`](Self::broadcast) for an already shared event.
    pub fn broadcast_shared<'a, I>(&self, recipients: I, event: Arc<Event>) -> DeliveryReport
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let handles = self.registry.resolve(recipients);
        let kind = event.kind();
        let mut report = DeliveryReport {
            resolved: handles.len(),
            ..DeliveryReport::default()
        };

        for handle in &handles {
            match handle.deliver(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    report.dropped += 1;
                    warn!(
                        connection = %handle.id(),
                        user = %handle.user_id(),
                        event = %kind,
                        "Outbound queue full, dropping event"
                    );
                }
                Err(DeliveryError::Closed) => {
                    report.dropped += 1;
                    debug!(
                        connection = %handle.id(),
                        event = %kind,
                        "Connection closed before delivery"
                    );
                }
            }
        }

        if report.is_gap() {
            trace!(event = %kind, "No live connections for recipients");
        } else {
            trace!(
                event = %kind,
                delivered = report.delivered,
                dropped = report.dropped,
                "Event dispatched"
            );
        }

        if let Some(observer) = &self.observer {
            observer.observe(kind, &report);
        }

        report
    }

    /// Deliver `event` to a single user's connections.
    pub fn emit_to(&self, user: &UserId, event: Event) -> DeliveryReport {
        self.broadcast(std::iter::once(user), event)
    }

    /// Deliver `event` to every connected user.
    pub fn broadcast_all(&self, event: Event) -> DeliveryReport {
        let users = self.registry.users();
        self.broadcast(&users, event)
    }
}
