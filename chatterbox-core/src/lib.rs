//! ChatterBox client core
//!
//! Client-side synchronization layer for the ChatterBox chat service:
//! transparent access-token renewal for REST calls, the realtime channel
//! connection, and the message sequence of the active conversation.

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod http;
pub mod logging;
pub mod protocol;
pub mod sync;
pub mod transport;

pub use client::{ChatClient, ChatSession, ClientConfig};
pub use error::{ChatError, ChatResult};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
