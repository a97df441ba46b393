//! Outbox consumers
//!
//! - [`StreamConsumer`]: consumer-group reader over a kind's durable stream.
//!   Each entry is delivered to exactly one consumer in the group and must be
//!   acknowledged after successful handling; unacknowledged entries stay in
//!   the pending list, claimable by other consumers after a crash.
//! - [`DelayedPoller`]: drains the delayed sorted set; an entry is removed
//!   only after its handler succeeds, so a crash or handler failure leads to
//!   redelivery (at-least-once).
//!
//! Both run as bounded, cancellable background loops with backoff on
//! transient read failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::{DELAYED_QUEUE_KEY, Event, EventKind};
use super::publisher::OutboxError;

/// Handler invoked for each delivered event
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Max entries per read
    pub batch_size: usize,
    /// Blocking read timeout per attempt
    pub block_timeout: Duration,
    /// Initial backoff after a failed read
    pub min_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            block_timeout: Duration::from_secs(5),
            min_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Consumer-group reader for one event kind's stream
pub struct StreamConsumer {
    client: redis::Client,
    kind: EventKind,
    group: String,
    consumer: String,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
}

impl StreamConsumer {
    pub fn new(
        client: redis::Client,
        kind: EventKind,
        group: impl Into<String>,
        consumer: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            client,
            kind,
            group: group.into(),
            consumer: consumer.into(),
            handler,
            config,
        }
    }

    /// Run the read loop until cancelled.
    ///
    /// Uses a dedicated connection: the blocking XREADGROUP must not stall
    /// other Redis traffic.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            stream = %self.kind.stream_key(),
            group = %self.group,
            consumer = %self.consumer,
            "Starting stream consumer"
        );

        let mut conn = loop {
            match self.client.get_multiplexed_async_connection().await {
                Ok(conn) => break conn,
                Err(e) => {
                    error!(error = %e, "Failed to connect stream consumer, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.config.max_backoff) => {}
                    }
                }
            }
        };

        // The group must exist before any XREADGROUP can succeed, so keep
        // retrying creation rather than entering the read loop without it.
        loop {
            match self.ensure_group(&mut conn).await {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "Failed to create consumer group, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.config.max_backoff) => {}
                    }
                }
            }
        }

        let mut backoff = self.config.min_backoff;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(group = %self.group, "Stream consumer shutting down");
                    return;
                }
                result = self.read_batch(&mut conn) => match result {
                    Ok(_) => backoff = self.config.min_backoff,
                    Err(e) => {
                        warn!(error = %e, "Stream read failed, backing off");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(self.config.max_backoff);
                        // The stream or group may have been dropped out from
                        // under us (NOGROUP); recreate before the next read
                        if let Err(e) = self.ensure_group(&mut conn).await {
                            warn!(error = %e, "Failed to re-create consumer group");
                        }
                    }
                }
            }
        }
    }

    /// Create the consumer group at the stream head, tolerating an existing
    /// group (BUSYGROUP).
    async fn ensure_group(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<(), OutboxError> {
        let result: Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(self.kind.stream_key(), &self.group, "$")
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_batch(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<usize, OutboxError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.config.batch_size)
            .block(self.config.block_timeout.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[self.kind.stream_key()], &[">"], &options)
            .await?;

        let mut handled = 0;
        for stream in reply.keys {
            for entry in stream.ids {
                let Some(raw) = entry.get::<String>("event") else {
                    warn!(entry_id = %entry.id, "Stream entry without event field, acking");
                    self.ack(conn, &entry.id).await?;
                    continue;
                };

                match serde_json::from_str::<Event>(&raw) {
                    Ok(event) => match self.handler.handle(event).await {
                        Ok(()) => {
                            self.ack(conn, &entry.id).await?;
                            handled += 1;
                        }
                        Err(e) => {
                            // Not acked: stays pending, claimable by the group
                            warn!(entry_id = %entry.id, error = %e, "Event handler failed");
                        }
                    },
                    Err(e) => {
                        error!(entry_id = %entry.id, error = %e, "Malformed event, acking to drop");
                        self.ack(conn, &entry.id).await?;
                    }
                }
            }
        }

        Ok(handled)
    }

    async fn ack(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entry_id: &str,
    ) -> Result<(), OutboxError> {
        let _acked: i64 = conn
            .xack(self.kind.stream_key(), &self.group, &[entry_id])
            .await?;
        Ok(())
    }
}

/// Poller for the delayed-delivery sorted set
pub struct DelayedPoller {
    client: redis::Client,
    handler: Arc<dyn EventHandler>,
    poll_interval: Duration,
    batch_size: isize,
}

impl DelayedPoller {
    pub fn new(
        client: redis::Client,
        handler: Arc<dyn EventHandler>,
        poll_interval: Duration,
        batch_size: isize,
    ) -> Self {
        Self {
            client,
            handler,
            poll_interval,
            batch_size,
        }
    }

    /// Run the poll loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Starting delayed-event poller"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Delayed-event poller shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!(count = n, "Delivered delayed events"),
                Err(e) => warn!(error = %e, "Delayed poll failed"),
            }
        }
    }

    /// Deliver every entry whose execution time has elapsed. The entry is
    /// removed only after its handler returns Ok, so a failed handler leaves
    /// it in place for the next cycle.
    pub async fn poll_once(&self) -> Result<usize, OutboxError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_QUEUE_KEY, 0i64, now, 0, self.batch_size)
            .await?;

        let mut delivered = 0;
        for raw in due {
            match serde_json::from_str::<Event>(&raw) {
                Ok(event) => {
                    let event_id = event.id;
                    match self.handler.handle(event).await {
                        Ok(()) => {
                            let _removed: i64 = conn.zrem(DELAYED_QUEUE_KEY, &raw).await?;
                            delivered += 1;
                        }
                        Err(e) => {
                            // Left in the set: redelivered next cycle
                            warn!(event_id = %event_id, error = %e, "Delayed handler failed");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Malformed delayed event, removing");
                    let _removed: i64 = conn.zrem(DELAYED_QUEUE_KEY, &raw).await?;
                }
            }
        }

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::event::payload;
    use crate::outbox::publisher::EventOutbox;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TEST_REDIS_URL: &str = "redis://localhost:6379/15";

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transient failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_ensure_group_can_be_rerun_safely() {
        let client = redis::Client::open(TEST_REDIS_URL).unwrap();
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        });
        let consumer = StreamConsumer::new(
            client.clone(),
            EventKind::WithdrawalRequested,
            "settlement",
            "worker-1",
            handler,
            ConsumerConfig::default(),
        );

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();

        // First call creates the group; repeated calls hit BUSYGROUP and must
        // still succeed, since the read loop re-runs this after failures
        consumer.ensure_group(&mut conn).await.unwrap();
        consumer.ensure_group(&mut conn).await.unwrap();
        consumer.ensure_group(&mut conn).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_delayed_event_redelivered_after_handler_failure() {
        let client = redis::Client::open(TEST_REDIS_URL).unwrap();
        let outbox = EventOutbox::connect(TEST_REDIS_URL).await.unwrap();

        let event = Event::new(
            EventKind::WithdrawalSettled,
            payload(&[("transferId", uuid::Uuid::new_v4().to_string())]),
        );
        outbox
            .publish_delayed(&event, Duration::from_millis(0))
            .await
            .unwrap();

        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        });
        let poller = DelayedPoller::new(
            client,
            handler.clone(),
            Duration::from_millis(50),
            100,
        );

        // First pass: handler fails, entry must survive
        poller.poll_once().await.unwrap();
        assert!(handler.calls.load(Ordering::SeqCst) >= 1);

        // Second pass: handler succeeds, entry removed
        let delivered = poller.poll_once().await.unwrap();
        assert!(delivered >= 1);

        // Third pass: nothing left for this event
        let again = poller.poll_once().await.unwrap();
        assert_eq!(again, 0);
    }
}
