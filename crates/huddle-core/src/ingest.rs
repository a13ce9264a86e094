//! Message ingestion.
//!
//! Ingestion runs in two phases: the realtime message is fanned out first,
//! then the canonical record is written by a detached task. A storage failure
//! is logged and dropped; it never reaches the sender and never re-sends.

use crate::dispatcher::EventDispatcher;
use crate::message::{compose, NewMessageRecord};
use async_trait::async_trait;
use huddle_protocol::{ChatId, Event, OutboundMessage, UserId, UserProfile};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Storage collaborator failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the request.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// The chat does not exist.
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    /// The write did not finish in time.
    #[error("Storage timed out after {0:?}")]
    Timeout(Duration),
}

/// Durable storage for chat messages and memberships.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message record.
    async fn create_message(&self, record: NewMessageRecord) -> Result<(), StoreError>;

    /// Members of a chat.
    async fn find_chat_members(&self, chat: &ChatId) -> Result<Vec<UserId>, StoreError>;
}

/// Fans out chat messages, then persists them in the background.
#[derive(Clone)]
pub struct IngestionPipeline {
    dispatcher: EventDispatcher,
    store: Arc<dyn MessageStore>,
    persist_timeout: Option<Duration>,
}

impl IngestionPipeline {
    /// Create a pipeline with no persistence timeout.
    #[must_use]
    pub fn new(dispatcher: EventDispatcher, store: Arc<dyn MessageStore>) -> Self {
        Self {
            dispatcher,
            store,
            persist_timeout: None,
        }
    }

    /// Abandon persistence attempts that take longer than `timeout`.
    #[must_use]
    pub fn with_persist_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.persist_timeout = timeout;
        self
    }

    /// Deliver a message to `members` and schedule its persistence.
    ///
    /// Members receive `message` and then `message-alert`. Returns as soon as
    /// both are queued; must be called from within a Tokio runtime.
    pub fn ingest(
        &self,
        chat_id: ChatId,
        sender: &UserProfile,
        content: impl Into<String>,
        members: &[UserId],
    ) -> OutboundMessage {
        let message = compose(chat_id, sender, content);
        let record = NewMessageRecord::from_outbound(&message);

        let delivered = self
            .dispatcher
            .broadcast(members, Event::message(message.clone()));
        self.dispatcher
            .broadcast(members, Event::message_alert(message.chat_id.clone()));

        debug!(
            chat = %message.chat_id,
            sender = %sender.id,
            message = %message.id,
            delivered = delivered.delivered,
            "Message fanned out"
        );

        self.spawn_persist(record);
        message
    }

    fn spawn_persist(&self, record: NewMessageRecord) {
        let store = Arc::clone(&self.store);
        let observer = self.dispatcher.observer().cloned();
        let timeout = self.persist_timeout;

        tokio::spawn(async move {
            let chat = record.chat.clone();
            let sender = record.sender.clone();

            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, store.create_message(record))
                    .await
                    .unwrap_or(Err(StoreError::Timeout(limit))),
                None => store.create_message(record).await,
            };

            match result {
                Ok(()) => debug!(chat = %chat, sender = %sender, "Message persisted"),
                Err(e) => {
                    error!(
                        chat = %chat,
                        sender = %sender,
                        error = %e,
                        "Failed to persist message"
                    );
                    if let Some(observer) = observer {
                        observer.persist_failed(&e);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use crate::dispatcher::{DeliveryObserver, DeliveryReport};
    use crate::registry::ConnectionRegistry;
    use huddle_protocol::EventKind;
    use tokio::sync::mpsc;

    /// Store that reports each write attempt on a channel.
    struct ReportingStore {
        fail: bool,
        delay: Option<Duration>,
        writes: mpsc::UnboundedSender<NewMessageRecord>,
    }

    #[async_trait]
    impl MessageStore for ReportingStore {
        async fn create_message(&self, record: NewMessageRecord) -> Result<(), StoreError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let _ = self.writes.send(record);
            if self.fail {
                Err(StoreError::Backend("disk full".to_string()))
            } else {
                Ok(())
            }
        }

        async fn find_chat_members(&self, chat: &ChatId) -> Result<Vec<UserId>, StoreError> {
            Err(StoreError::ChatNotFound(chat.clone()))
        }
    }

    fn pipeline(
        fail: bool,
        delay: Option<Duration>,
    ) -> (
        IngestionPipeline,
        Arc<ConnectionRegistry>,
        mpsc::UnboundedReceiver<NewMessageRecord>,
    ) {
        let (writes, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(ReportingStore {
            fail,
            delay,
            writes,
        });
        let pipeline = IngestionPipeline::new(EventDispatcher::new(registry.clone()), store);
        (pipeline, registry, rx)
    }

    #[tokio::test]
    async fn test_fan_out_then_persist() {
        let (pipeline, registry, mut writes) = pipeline(false, None);
        let (bob, mut bob_rx) = ConnectionHandle::new(UserProfile::new("bob", "Bob"), 8);
        registry.register(bob);

        let alice = UserProfile::new("alice", "Alice");
        let members: Vec<UserId> = vec!["alice".into(), "bob".into()];
        let sent = pipeline.ingest("c1".into(), &alice, "hi", &members);

        match &*bob_rx.recv().await.unwrap() {
            Event::Message { chat_id, message } => {
                assert_eq!(chat_id.as_str(), "c1");
                assert_eq!(message, &sent);
            }
            other => panic!("Expected message, got {:?}", other),
        }
        assert_eq!(*bob_rx.recv().await.unwrap(), Event::message_alert("c1"));

        let record = writes.recv().await.unwrap();
        assert_eq!(
            record,
            NewMessageRecord {
                chat: "c1".into(),
                sender: "alice".into(),
                content: "hi".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed() {
        let (pipeline, registry, mut writes) = pipeline(true, None);
        let (bob, mut bob_rx) = ConnectionHandle::new(UserProfile::new("bob", "Bob"), 8);
        registry.register(bob);

        let members: Vec<UserId> = vec!["bob".into()];
        pipeline.ingest("c1".into(), &UserProfile::new("alice", "Alice"), "hi", &members);

        assert!(writes.recv().await.is_some());
        tokio::task::yield_now().await;

        assert!(matches!(&*bob_rx.recv().await.unwrap(), Event::Message { .. }));
        assert!(matches!(&*bob_rx.recv().await.unwrap(), Event::MessageAlert { .. }));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_online_members() {
        let (pipeline, _registry, mut writes) = pipeline(false, None);
        let members: Vec<UserId> = vec!["offline".into()];

        let sent = pipeline.ingest("c2".into(), &UserProfile::new("alice", "Alice"), "yo", &members);

        assert_eq!(sent.content, "yo");
        assert_eq!(writes.recv().await.unwrap().chat.as_str(), "c2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_timeout() {
        let (pipeline, registry, mut writes) = pipeline(false, Some(Duration::from_secs(60)));
        let pipeline = pipeline.with_persist_timeout(Some(Duration::from_secs(1)));
        let (bob, mut bob_rx) = ConnectionHandle::new(UserProfile::new("bob", "Bob"), 8);
        registry.register(bob);

        let members: Vec<UserId> = vec!["bob".into()];
        pipeline.ingest("c1".into(), &UserProfile::new("alice", "Alice"), "late", &members);

        tokio::time::sleep(Duration::from_secs(120)).await;

        // The write was abandoned before the store reported it.
        assert!(writes.try_recv().is_err());
        assert!(bob_rx.try_recv().is_ok());
    }

    /// Observer that forwards persistence failures.
    struct FailureSink(mpsc::UnboundedSender<String>);

    impl DeliveryObserver for FailureSink {
        fn observe(&self, _kind: EventKind, _report: &DeliveryReport) {}

        fn persist_failed(&self, error: &StoreError) {
            let _ = self.0.send(error.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_failures_reach_observer() {
        let (failures, mut failures_rx) = mpsc::unbounded_channel();
        let observer: Arc<dyn DeliveryObserver> = Arc::new(FailureSink(failures));
        let (writes, _writes_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(registry).with_observer(observer);
        let sender = UserProfile::new("alice", "Alice");

        let slow = Arc::new(ReportingStore {
            fail: false,
            delay: Some(Duration::from_secs(60)),
            writes: writes.clone(),
        });
        IngestionPipeline::new(dispatcher.clone(), slow)
            .with_persist_timeout(Some(Duration::from_secs(1)))
            .ingest("c1".into(), &sender, "late", &[]);
        let error = failures_rx.recv().await.unwrap();
        assert!(error.contains("timed out"), "{}", error);

        let broken = Arc::new(ReportingStore {
            fail: true,
            delay: None,
            writes,
        });
        IngestionPipeline::new(dispatcher, broken).ingest("c1".into(), &sender, "hi", &[]);
        let error = failures_rx.recv().await.unwrap();
        assert!(error.contains("disk full"), "{}", error);
    }
}
