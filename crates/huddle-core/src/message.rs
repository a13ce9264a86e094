//! Realtime message construction.
//!
//! Messages fanned out to clients get a synthetic ID and a timestamp taken
//! here, without a round trip to storage.

use chrono::{SecondsFormat, Utc};
use huddle_protocol::{ChatId, OutboundMessage, UserId, UserProfile};
use serde::Serialize;
use uuid::Uuid;

/// Generate a client-visible message ID.
#[must_use]
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as an RFC 3339 timestamp with millisecond precision.
#[must_use]
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the realtime representation of a message.
#[must_use]
pub fn compose(chat_id: ChatId, sender: &UserProfile, content: impl Into<String>) -> OutboundMessage {
    OutboundMessage {
        id: generate_message_id(),
        content: content.into(),
        sender: sender.clone(),
        chat_id,
        created_at: timestamp_now(),
    }
}

/// The canonical record handed to storage.
///
/// Carries no synthetic ID and no sender profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessageRecord {
    /// Target chat.
    pub chat: ChatId,
    /// Sender's user ID.
    pub sender: UserId,
    /// Message text.
    pub content: String,
}

impl NewMessageRecord {
    /// Derive the storage record from a realtime message.
    #[must_use]
    pub fn from_outbound(message: &OutboundMessage) -> Self {
        Self {
            chat: message.chat_id.clone(),
            sender: message.sender.id.clone(),
            content: message.content.clone(),
        }
    }
}
