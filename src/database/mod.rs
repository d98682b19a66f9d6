//! The `database` module is the boundary between the relay and the notify
//! mechanism it sits on.
//!
//! The relay only ever talks to a [`NotifyBackend`]: it opens one
//! [`ListenStream`] per channel and publishes through the backend's shared
//! pool. Two implementations exist:
//!
//! - [`PostgresBackend`]: `sqlx` pool for `pg_notify`, one `PgListener` per channel.
//! - [`MemoryBackend`]: in-process broadcast channels, used by tests and by
//!   `pgrelay server --memory`.

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

use async_trait::async_trait;

use crate::utils::BackendError;

/// A notification as received from upstream, before payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

/// Opens listen connections and issues notifications.
#[async_trait]
pub trait NotifyBackend: Send + Sync + 'static {
    /// Open a dedicated connection and start listening on `channel`.
    async fn listen(&self, channel: &str) -> Result<Box<dyn ListenStream>, BackendError>;

    /// Send `payload` to `channel` on a pooled connection.
    async fn notify(&self, channel: &str, payload: &str) -> Result<(), BackendError>;

    /// Round-trip a trivial request to check the backend is reachable.
    async fn ping(&self) -> Result<(), BackendError>;
}

/// The notification stream of one dedicated listen connection.
///
/// Dropping the stream closes the underlying connection.
#[async_trait]
pub trait ListenStream: Send {
    /// Wait for the next notification. `Ok(None)` means the stream has ended
    /// and will not produce anything further.
    async fn recv(&mut self) -> Result<Option<RawNotification>, BackendError>;

    /// Stop listening on the stream's channel.
    async fn unlisten(&mut self) -> Result<(), BackendError>;
}
