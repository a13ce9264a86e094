//! # huddle-protocol
//!
//! Wire protocol definitions for the Huddle realtime chat engine.
//!
//! This crate defines the envelopes exchanged between chat clients and the
//! fan-out server, and the codecs that carry them.
//!
//! ## Envelopes
//!
//! - [`Event`] - server-to-client notifications (`message`, `message-alert`,
//!   `typing-start`, `typing-stop`, `presence-update`, `generic-alert`,
//!   `refetch-signal`, `new-request`)
//! - [`ClientFrame`] - client-to-server frames (`new-message`, typing,
//!   `chat-joined`, `chat-leaved`)
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, Event};
//!
//! let event = Event::message_alert("chat-42");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: Event = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod event;
pub mod frames;

pub use codec::{decode, encode, Encoding, FrameCodec, ProtocolError, WireFrame};
pub use event::{Alert, ChatId, Event, EventKind, OutboundMessage, UserId, UserProfile};
pub use frames::ClientFrame;
