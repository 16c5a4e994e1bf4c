//! # Realtime Core Module
//!
//! The realtime coordination layer of the chat backend. It tracks who is
//! online, which connections belong to which rooms, relays call and live
//! stream negotiation between peers, and keeps the table of live broadcast
//! sessions, including the grace period that lets a host reconnect without
//! ending the stream.
//!
//! ## Core Components:
//!
//! - **`events`**: The wire protocol. Decodes inbound `{event, data}` frames
//!   into [`ClientEvent`]s and defines every outbound [`ServerEvent`].
//!
//! - **`registry`**: Presence. Maps each online user to exactly one live
//!   connection (the most recent one).
//!
//! - **`rooms`**: Named delivery scopes joined by connections. Rooms exist
//!   only while they have members.
//!
//! - **`signaling`**: Stateless routing of call invites, call answers and live
//!   WebRTC negotiation payloads. Payloads pass through untouched.
//!
//! - **`live_sessions`**: The live broadcast table and its host-disconnect
//!   grace timers.
//!
//! - **`dispatcher`**: The single entry point for connections. Owns all of the
//!   above behind one lock and fans outbound events to per-connection channels.
//!
//! - **`error`**: The per-event error type.
//!
//! Transport concerns (websocket framing, HTTP, TLS) live in the `servers`
//! crate; nothing here knows about sockets.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The central router and fan-out point for all realtime traffic.
pub mod dispatcher;
/// Errors raised while handling a single inbound event.
pub mod error;
/// Inbound and outbound wire events.
pub mod events;
/// Live broadcast sessions and their grace timers.
pub mod live_sessions;
/// Online users and their current connection.
pub mod registry;
/// Room membership.
pub mod rooms;
/// Peer-to-peer signaling relay.
pub mod signaling;

// --- Public API Re-exports ---
pub use dispatcher::{Dispatcher, DispatcherOptions, EventReceiver, DEFAULT_GRACE_PERIOD};
pub use error::{RealtimeError, RealtimeResult};
pub use events::{ClientEvent, ConnectionId, PresenceEntry, RoomId, ServerEvent, UserId};
pub use live_sessions::{HostTakeover, LiveSession, LiveSessions};
pub use registry::Registry;
pub use rooms::Rooms;
