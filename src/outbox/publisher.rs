//! Event outbox publisher
//!
//! Three delivery primitives over one Redis backing store:
//! - `publish`: fire-and-forget pub/sub notification, lost if nobody listens
//! - `publish_to_stream`: durable append to the kind's stream, then a
//!   best-effort pub/sub hint; durability comes from the stream
//! - `publish_delayed`: sorted-set insert scored by execution time, drained
//!   by [`DelayedPoller`](super::consumer::DelayedPoller)

use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use thiserror::Error;

use super::event::{DELAYED_QUEUE_KEY, Event};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Event serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Redis-backed event outbox
#[derive(Clone)]
pub struct EventOutbox {
    conn: ConnectionManager,
}

impl EventOutbox {
    /// Connect with an auto-reconnecting managed connection
    pub async fn connect(redis_url: &str) -> Result<Self, OutboxError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Redis outbox connection established");
        Ok(Self { conn })
    }

    /// Fire-and-forget notification on the event kind's channel.
    ///
    /// No persistence: the event is lost if no subscriber is listening.
    pub async fn publish(&self, event: &Event) -> Result<(), OutboxError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(event)?;
        let _receivers: i64 = conn.publish(event.kind.channel(), body).await?;
        Ok(())
    }

    /// Durable append to the kind's stream, then a best-effort pub/sub hint.
    ///
    /// Returns the stream entry id. A failed hint is logged and ignored; the
    /// stream entry is the source of truth.
    pub async fn publish_to_stream(&self, event: &Event) -> Result<String, OutboxError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(event)?;

        let entry_id: String = conn
            .xadd(event.kind.stream_key(), "*", &[("event", body.as_str())])
            .await?;

        if let Err(e) = conn
            .publish::<_, _, i64>(event.kind.channel(), body.as_str())
            .await
        {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "Pub/sub hint failed after durable stream append"
            );
        }

        tracing::debug!(
            event_id = %event.id,
            kind = ?event.kind,
            entry_id = %entry_id,
            "Event appended to stream"
        );
        Ok(entry_id)
    }

    /// Schedule an event for delivery after `delay`.
    ///
    /// The serialized envelope is the sorted-set member; the score is the
    /// ms-epoch execution time.
    pub async fn publish_delayed(&self, event: &Event, delay: Duration) -> Result<(), OutboxError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(event)?;
        let execute_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let _added: i64 = conn.zadd(DELAYED_QUEUE_KEY, body, execute_at).await?;

        tracing::debug!(
            event_id = %event.id,
            execute_at,
            "Event scheduled for delayed delivery"
        );
        Ok(())
    }

    /// Raw managed connection, for callers composing their own commands
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::event::{EventKind, payload};

    const TEST_REDIS_URL: &str = "redis://localhost:6379/15";

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_publish_to_stream_returns_entry_id() {
        let outbox = EventOutbox::connect(TEST_REDIS_URL).await.unwrap();
        let event = Event::new(
            EventKind::WithdrawalRequested,
            payload(&[("transferId", "01J8ZTEST".to_string())]),
        );

        let entry_id = outbox.publish_to_stream(&event).await.unwrap();
        assert!(entry_id.contains('-'), "XADD id format: {entry_id}");
    }

    #[tokio::test]
    #[ignore]
    async fn test_publish_without_subscribers_is_lost_but_ok() {
        let outbox = EventOutbox::connect(TEST_REDIS_URL).await.unwrap();
        let event = Event::new(EventKind::TransferCompleted, payload(&[]));
        outbox.publish(&event).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_publish_delayed_lands_in_sorted_set() {
        let outbox = EventOutbox::connect(TEST_REDIS_URL).await.unwrap();
        let event = Event::new(EventKind::WithdrawalSettled, payload(&[]));
        outbox
            .publish_delayed(&event, Duration::from_secs(60))
            .await
            .unwrap();

        let mut conn = outbox.connection();
        let count: i64 = conn.zcard(DELAYED_QUEUE_KEY).await.unwrap();
        assert!(count >= 1);
    }
}
