//! The `client` module defines the server-side handle of one connected
//! WebSocket client.
//!
//! A [`Client`] is cheap to clone: the multiplexer keeps one copy in the
//! connection entry and every delivery callback keeps another. All copies
//! share the bounded outbound queue and the open flag.

pub mod pubsub_client;
pub use pubsub_client::{Client, ClientId};
