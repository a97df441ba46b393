//! Event envelope and key mapping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Event kinds carried by the outbox.
///
/// Each kind maps to its own notification channel and stream key, so
/// consumers subscribe to exactly the kinds they handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// An external transfer was committed and awaits on-chain settlement
    WithdrawalRequested,
    /// The settlement worker closed out a withdrawal (confirmed or failed)
    WithdrawalSettled,
    /// An internal transfer completed
    TransferCompleted,
}

impl EventKind {
    fn suffix(&self) -> &'static str {
        match self {
            EventKind::WithdrawalRequested => "withdrawal_requested",
            EventKind::WithdrawalSettled => "withdrawal_settled",
            EventKind::TransferCompleted => "transfer_completed",
        }
    }

    /// Pub/sub channel for fire-and-forget notifications
    pub fn channel(&self) -> String {
        format!("events:{}", self.suffix())
    }

    /// Durable stream key
    pub fn stream_key(&self) -> String {
        format!("stream:events:{}", self.suffix())
    }
}

/// Sorted-set key holding delayed events (score = ms-epoch execution time)
pub const DELAYED_QUEUE_KEY: &str = "events:delayed";

/// Event delivery status. Events are never mutated once durable; consumers
/// acknowledge out-of-band (stream ack / sorted-set removal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Published,
    Delayed,
}

/// Outbox event envelope, serialized as JSON on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: EventStatus,
}

impl Event {
    pub fn new(kind: EventKind, payload: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            status: EventStatus::Published,
        }
    }
}

/// Builder-style helper for the common string-map payloads
pub fn payload(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(
            EventKind::WithdrawalRequested.channel(),
            "events:withdrawal_requested"
        );
        assert_eq!(
            EventKind::WithdrawalRequested.stream_key(),
            "stream:events:withdrawal_requested"
        );
        assert_eq!(
            EventKind::TransferCompleted.stream_key(),
            "stream:events:transfer_completed"
        );
    }

    #[test]
    fn test_wire_format() {
        let event = Event::new(
            EventKind::WithdrawalRequested,
            payload(&[
                ("transferId", "01J8ZTEST".to_string()),
                ("amount", "50".to_string()),
            ]),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "WITHDRAWAL_REQUESTED");
        assert_eq!(json["payload"]["transferId"], "01J8ZTEST");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["status"], "PUBLISHED");
        assert!(json["createdAt"].is_string());

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.kind, EventKind::WithdrawalRequested);
    }
}
