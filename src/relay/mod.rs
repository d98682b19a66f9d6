//! The relay: one upstream subscription per channel, fanned out to every
//! interested subscriber.
//!
//! - `registry`: per-channel subscriber sets and upstream handles.
//! - `engine`: `NotificationRelay`, the public subscribe/unsubscribe/publish API.
//! - `payload`: text encoding of outgoing payloads and decoding of incoming ones.

pub mod channel;
pub mod engine;
pub mod payload;
pub mod registry;

pub use channel::{Callback, SubscriberId};
pub use engine::NotificationRelay;
pub use registry::ChannelRegistry;

#[cfg(test)]
mod tests;
