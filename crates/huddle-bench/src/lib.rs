//! Shared fixtures for Huddle benchmarks.

use async_trait::async_trait;
use huddle_core::{
    ConnectionHandle, ConnectionRegistry, MessageStore, NewMessageRecord, Outbox, StoreError,
};
use huddle_protocol::{ChatId, UserId, UserProfile};

/// Outbound queue capacity used by benchmark connections.
pub const BENCH_OUTBOX_CAPACITY: usize = 1024;

/// Store that accepts every write and knows no chats.
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl MessageStore for NullStore {
    async fn create_message(&self, _record: NewMessageRecord) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_chat_members(&self, chat: &ChatId) -> Result<Vec<UserId>, StoreError> {
        Err(StoreError::ChatNotFound(chat.clone()))
    }
}

/// User IDs `user-0` .. `user-{count - 1}`.
#[must_use]
pub fn user_ids(count: usize) -> Vec<UserId> {
    (0..count).map(|i| UserId::new(format!("user-{}", i))).collect()
}

/// Register `devices` connections for each of `users` users.
///
/// Returns the user IDs and every connection's outbox; dropping an outbox
/// closes its connection.
pub fn populate(
    registry: &ConnectionRegistry,
    users: usize,
    devices: usize,
) -> (Vec<UserId>, Vec<Outbox>) {
    let ids = user_ids(users);
    let mut outboxes = Vec::with_capacity(users * devices);

    for id in &ids {
        for _ in 0..devices {
            let (handle, outbox) = ConnectionHandle::new(
                UserProfile::new(id.clone(), id.as_str()),
                BENCH_OUTBOX_CAPACITY,
            );
            registry.register(handle);
            outboxes.push(outbox);
        }
    }

    (ids, outboxes)
}

/// Empty every outbox, returning how many events were waiting.
pub fn drain(outboxes: &mut [Outbox]) -> usize {
    let mut count = 0;
    for outbox in outboxes {
        while outbox.try_recv().is_ok() {
            count += 1;
        }
    }
    count
}
