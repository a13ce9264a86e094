//! # huddle-core
//!
//! Connection registry, presence and event fan-out for the Huddle realtime
//! chat engine.
//!
//! This crate provides the building blocks the server wires together:
//!
//! - **Admission** - Turn a credential into a connection handle
//! - **Registry** - Track the live connections of every user
//! - **Presence** - The set of users currently online
//! - **Dispatcher** - Deliver events to the connections of a set of users
//! - **Ingest** - Fan out chat messages, then persist them in the background
//! - **Hub** - Connection lifecycle and client signaling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Admission  │────▶│     Hub     │────▶│  Presence   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   Ingest    │────▶│MessageStore │
//!                     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │ Dispatcher  │────▶│  Registry   │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod admission;
pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod ingest;
pub mod message;
pub mod presence;
pub mod registry;

pub use admission::{Admission, AdmissionError, AdmissionGate, AuthError, Authenticator};
pub use connection::{ConnectionHandle, ConnectionId, DeliveryError, Outbox};
pub use dispatcher::{DeliveryObserver, DeliveryReport, EventDispatcher};
pub use hub::{FrameOutcome, Hub, HubConfig, HubStats};
pub use ingest::{IngestionPipeline, MessageStore, StoreError};
pub use message::NewMessageRecord;
pub use presence::PresenceTracker;
pub use registry::ConnectionRegistry;
