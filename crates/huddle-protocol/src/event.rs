//! Event types delivered from the server to connected clients.
//!
//! Every event travels as an `{"event": <kind>, "data": <body>}` envelope.
//! The kinds and body shapes here are a stable contract: the CRUD backend
//! posts them through the notify endpoint and clients switch on `event`.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identifier of an authenticated user.
    UserId
);

string_id!(
    /// Identifier of a chat (direct or group).
    ChatId
);

/// Minimal user profile carried in realtime payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
}

impl UserProfile {
    /// Create a new profile.
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Realtime representation of a chat message.
///
/// This is not the persisted record: `id` is synthetic and `sender` is
/// denormalized so clients can render the message without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Client-visible identifier, unrelated to the storage id.
    pub id: String,
    /// Message text.
    pub content: String,
    /// Who sent it.
    pub sender: UserProfile,
    /// Target chat.
    pub chat_id: ChatId,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Body of a `generic-alert` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    /// Free-form text.
    Text(String),
    /// Text scoped to a chat.
    Chat {
        /// Alert text.
        message: String,
        /// Chat the alert refers to.
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
}

/// Event kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    MessageAlert,
    TypingStart,
    TypingStop,
    PresenceUpdate,
    GenericAlert,
    RefetchSignal,
    NewRequest,
}

impl EventKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::MessageAlert => "message-alert",
            EventKind::TypingStart => "typing-start",
            EventKind::TypingStop => "typing-stop",
            EventKind::PresenceUpdate => "presence-update",
            EventKind::GenericAlert => "generic-alert",
            EventKind::RefetchSignal => "refetch-signal",
            EventKind::NewRequest => "new-request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-to-client notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    /// A new chat message.
    Message {
        chat_id: ChatId,
        message: OutboundMessage,
    },

    /// Unread-count nudge for a chat; carries no content.
    MessageAlert { chat_id: ChatId },

    /// A member started typing.
    TypingStart { chat_id: ChatId },

    /// A member stopped typing.
    TypingStop { chat_id: ChatId },

    /// Full list of online users.
    PresenceUpdate(Vec<UserId>),

    /// Informational alert.
    GenericAlert(Alert),

    /// The listed users should re-fetch their chat list.
    RefetchSignal(Vec<UserId>),

    /// A friend request arrived.
    NewRequest,
}

impl Event {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Message { .. } => EventKind::Message,
            Event::MessageAlert { .. } => EventKind::MessageAlert,
            Event::TypingStart { .. } => EventKind::TypingStart,
            Event::TypingStop { .. } => EventKind::TypingStop,
            Event::PresenceUpdate(_) => EventKind::PresenceUpdate,
            Event::GenericAlert(_) => EventKind::GenericAlert,
            Event::RefetchSignal(_) => EventKind::RefetchSignal,
            Event::NewRequest => EventKind::NewRequest,
        }
    }

    /// Create a `message` event.
    #[must_use]
    pub fn message(message: OutboundMessage) -> Self {
        Event::Message {
            chat_id: message.chat_id.clone(),
            message,
        }
    }

    /// Create a `message-alert` event.
    #[must_use]
    pub fn message_alert(chat_id: impl Into<ChatId>) -> Self {
        Event::MessageAlert {
            chat_id: chat_id.into(),
        }
    }

    /// Create a `typing-start` event.
    #[must_use]
    pub fn typing_start(chat_id: impl Into<ChatId>) -> Self {
        Event::TypingStart {
            chat_id: chat_id.into(),
        }
    }

    /// Create a `typing-stop` event.
    #[must_use]
    pub fn typing_stop(chat_id: impl Into<ChatId>) -> Self {
        Event::TypingStop {
            chat_id: chat_id.into(),
        }
    }

    /// Create a `presence-update` event.
    #[must_use]
    pub fn presence(online: Vec<UserId>) -> Self {
        Event::PresenceUpdate(online)
    }

    /// Create a free-form `generic-alert` event.
    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Event::GenericAlert(Alert::Text(message.into()))
    }

    /// Create a chat-scoped `generic-alert` event.
    #[must_use]
    pub fn chat_alert(chat_id: impl Into<ChatId>, message: impl Into<String>) -> Self {
        Event::GenericAlert(Alert::Chat {
            message: message.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Create a `refetch-signal` event.
    #[must_use]
    pub fn refetch(users: Vec<UserId>) -> Self {
        Event::RefetchSignal(users)
    }
}
