//! pgrelay
//!
//! Relays PostgreSQL `LISTEN`/`NOTIFY` channels to WebSocket clients.
//!
//! - [`relay`]: channel registry and notification relay, one upstream listen per channel
//! - [`transport`]: WebSocket server and the per-connection multiplexer
//! - [`http`]: REST API for publishing, channel listing and health
//! - [`database`]: notify backends (PostgreSQL and in-memory)
//! - [`client`]: handle to a connection's outbound queue
//! - [`config`], [`utils`]: settings, errors and logging

pub mod client;
pub mod config;
pub mod database;
pub mod http;
pub mod relay;
pub mod transport;
pub mod utils;
