//! Shared building blocks for the chat backend's realtime services.
//!
//! Modules are gated behind cargo features so transport crates only pull in
//! what they use.

#[cfg(feature = "core")]
pub mod core;
