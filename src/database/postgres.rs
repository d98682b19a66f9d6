use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgListener, PgPoolOptions};
use tracing::debug;

use super::{ListenStream, NotifyBackend, RawNotification};
use crate::config::DatabaseSettings;
use crate::utils::BackendError;

/// PostgreSQL `LISTEN`/`NOTIFY` backend.
///
/// Publishing goes through a shared pool. Every `listen` call opens its own
/// connection, so listeners never borrow from the publish pool.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    url: String,
}

impl PostgresBackend {
    /// Connect the publish pool described by `settings`.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, BackendError> {
        let url = settings.connection_url();
        let pool = PgPoolOptions::new()
            .max_connections(settings.pool_size)
            .connect(&url)
            .await?;
        Ok(Self { pool, url })
    }
}

#[async_trait]
impl NotifyBackend for PostgresBackend {
    async fn listen(&self, channel: &str) -> Result<Box<dyn ListenStream>, BackendError> {
        let mut listener = PgListener::connect(&self.url).await?;
        // sqlx quotes the identifier, so the channel name stays case-sensitive.
        listener.listen(channel).await?;
        debug!(channel, "LISTEN issued");
        Ok(Box::new(PgListenStream {
            listener,
            channel: channel.to_string(),
        }))
    }

    async fn notify(&self, channel: &str, payload: &str) -> Result<(), BackendError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgListenStream {
    listener: PgListener,
    channel: String,
}

#[async_trait]
impl ListenStream for PgListenStream {
    async fn recv(&mut self) -> Result<Option<RawNotification>, BackendError> {
        // `recv` reconnects and re-issues LISTEN by itself when the connection drops.
        let notification = self.listener.recv().await?;
        Ok(Some(RawNotification {
            channel: notification.channel().to_string(),
            payload: notification.payload().to_string(),
        }))
    }

    async fn unlisten(&mut self) -> Result<(), BackendError> {
        self.listener.unlisten(&self.channel).await?;
        debug!(channel = %self.channel, "UNLISTEN issued");
        Ok(())
    }
}
