//! Notification bus backends.
//!
//! [`PgNotifyBus`] is the production backend over PostgreSQL
//! LISTEN/NOTIFY. [`MemoryNotifyBus`] backs integration tests and
//! single-process deployments with an in-process broadcast channel; both
//! sides of the fleet tests subscribe to the same memory bus the way two
//! processes share one database.

use super::DatabaseNotification;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use thiserror::Error;
use tokio::sync::broadcast;

/// Notification channel errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification connection error: {0}")]
    Connection(#[from] sqlx::Error),
    #[error("notification bus closed")]
    Closed,
}

/// A connected subscription yielding raw notifications.
#[async_trait]
pub trait NotifyStream: Send {
    /// Wait for the next notification. An error means the underlying
    /// connection broke and the caller should reconnect.
    async fn recv(&mut self) -> Result<DatabaseNotification, NotifyError>;
}

/// Publish/subscribe transport shared by the fleet.
#[async_trait]
pub trait NotifyBus: Send + Sync {
    /// Broadcast a payload on a channel to every subscribed process,
    /// including the caller.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError>;

    /// Open a subscription covering `channels`.
    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn NotifyStream>, NotifyError>;
}

// ============================================================================
// PostgreSQL LISTEN/NOTIFY
// ============================================================================

/// PostgreSQL-backed bus. Publishing uses `pg_notify` so the payload rides
/// the same transaction machinery as the record insert that precedes it.
pub struct PgNotifyBus {
    pool: PgPool,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> PgNotifyBus {
        PgNotifyBus { pool }
    }
}

struct PgStream {
    listener: PgListener,
}

#[async_trait]
impl NotifyStream for PgStream {
    async fn recv(&mut self) -> Result<DatabaseNotification, NotifyError> {
        let notification = self.listener.recv().await?;
        Ok(DatabaseNotification {
            channel: notification.channel().to_string(),
            payload: Some(notification.payload().to_string()),
        })
    }
}

#[async_trait]
impl NotifyBus for PgNotifyBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn NotifyStream>, NotifyError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen_all(channels.iter().copied()).await?;
        Ok(Box::new(PgStream { listener }))
    }
}

// ============================================================================
// In-process broadcast
// ============================================================================

/// In-process bus over `tokio::sync::broadcast`.
#[derive(Clone)]
pub struct MemoryNotifyBus {
    tx: broadcast::Sender<DatabaseNotification>,
}

impl Default for MemoryNotifyBus {
    fn default() -> Self {
        MemoryNotifyBus::new()
    }
}

impl MemoryNotifyBus {
    pub fn new() -> MemoryNotifyBus {
        let (tx, _) = broadcast::channel(256);
        MemoryNotifyBus { tx }
    }
}

struct MemoryStream {
    rx: broadcast::Receiver<DatabaseNotification>,
    channels: Vec<String>,
}

#[async_trait]
impl NotifyStream for MemoryStream {
    async fn recv(&mut self) -> Result<DatabaseNotification, NotifyError> {
        loop {
            match self.rx.recv().await {
                Ok(notification) => {
                    if self.channels.iter().any(|c| *c == notification.channel) {
                        return Ok(notification);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "memory notify stream lagged, notifications lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(NotifyError::Closed),
            }
        }
    }
}

#[async_trait]
impl NotifyBus for MemoryNotifyBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        // No subscribers is fine; a lone server still publishes.
        let _ = self.tx.send(DatabaseNotification {
            channel: channel.to_string(),
            payload: Some(payload.to_string()),
        });
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn NotifyStream>, NotifyError> {
        Ok(Box::new(MemoryStream {
            rx: self.tx.subscribe(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }))
    }
}
