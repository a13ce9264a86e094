//! Client-to-server frames.
//!
//! Clients use the same `{"event", "data"}` envelope as server events. The
//! sender is never part of a frame: the server takes it from the connection.

use serde::{Deserialize, Serialize};

use crate::event::{ChatId, UserId};

/// A frame sent by a client over an established connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    /// Send a chat message to the listed members.
    NewMessage {
        /// Target chat.
        chat_id: ChatId,
        /// Recipients, as known by the client.
        members: Vec<UserId>,
        /// Message text.
        message: String,
    },

    /// Typing started; delivered to exactly `members`.
    TypingStart {
        chat_id: ChatId,
        #[serde(alias = "member")]
        members: Vec<UserId>,
    },

    /// Typing stopped; delivered to exactly `members`.
    TypingStop {
        chat_id: ChatId,
        #[serde(alias = "member")]
        members: Vec<UserId>,
    },

    /// The user opened a chat view and is online for `members`.
    ChatJoined {
        #[serde(alias = "member")]
        members: Vec<UserId>,
    },

    /// The user left the chat view.
    ChatLeaved {
        #[serde(alias = "member")]
        members: Vec<UserId>,
    },
}

impl ClientFrame {
    /// Wire name of the frame, for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::NewMessage { .. } => "new-message",
            ClientFrame::TypingStart { .. } => "typing-start",
            ClientFrame::TypingStop { .. } => "typing-stop",
            ClientFrame::ChatJoined { .. } => "chat-joined",
            ClientFrame::ChatLeaved { .. } => "chat-leaved",
        }
    }

    /// Create a `new-message` frame.
    #[must_use]
    pub fn new_message(
        chat_id: impl Into<ChatId>,
        members: Vec<UserId>,
        message: impl Into<String>,
    ) -> Self {
        ClientFrame::NewMessage {
            chat_id: chat_id.into(),
            members,
            message: message.into(),
        }
    }

    /// Create a `chat-joined` frame.
    #[must_use]
    pub fn joined(members: Vec<UserId>) -> Self {
        ClientFrame::ChatJoined { members }
    }

    /// Create a `chat-leaved` frame.
    #[must_use]
    pub fn leaved(members: Vec<UserId>) -> Self {
        ClientFrame::ChatLeaved { members }
    }
}
