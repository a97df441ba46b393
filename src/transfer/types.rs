//! Transfer core types and DTOs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::error::TransferError;
use super::state::{ExternalStatus, InternalKind, InternalStatus};

/// Business transfer id - ULID-based unique identifier
///
/// ULIDs are monotonic and sortable, and need no coordination between the
/// workers that generate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Receiver resolution strategies for internal transfers.
///
/// A tagged variant rather than string branching, so a new strategy (e.g.
/// email) is a closed, testable extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverRef {
    /// Deposit-address lookup -> owning user
    Address(String),
    /// Referral-code lookup -> user
    ReferralCode(String),
    /// Direct user id; reserved for elevated-privilege callers
    UserId(i64),
}

impl ReceiverRef {
    /// Build from the wire pair (receiverType, receiverValue)
    pub fn parse(receiver_type: &str, value: &str) -> Result<Self, TransferError> {
        match receiver_type {
            "ADDRESS" => Ok(ReceiverRef::Address(value.to_string())),
            "REFERRAL_CODE" => Ok(ReceiverRef::ReferralCode(value.to_string())),
            "USER_ID" => value
                .parse::<i64>()
                .map(ReceiverRef::UserId)
                .map_err(|_| TransferError::InvalidReceiverType(receiver_type.to_string())),
            other => Err(TransferError::InvalidReceiverType(other.to_string())),
        }
    }
}

// ============================================================================
// Wire DTOs
// ============================================================================

/// POST /api/v1/transfers/internal request body
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalTransferRequest {
    /// ADDRESS | REFERRAL_CODE | USER_ID
    #[schema(example = "REFERRAL_CODE")]
    pub receiver_type: String,
    #[validate(length(min = 1))]
    #[schema(example = "FOXY-8H2K")]
    pub receiver_value: String,
    #[validate(length(min = 1))]
    #[schema(example = "FOXYA")]
    pub currency_code: String,
    /// Decimal amount as a string to preserve precision
    #[validate(length(min = 1))]
    #[schema(example = "100")]
    pub amount: String,
    pub memo: Option<String>,
    /// Client idempotency key; retries with the same cid return the original record
    pub cid: Option<String>,
}

/// POST /api/v1/transfers/external request body
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTransferRequest {
    #[validate(length(min = 1))]
    #[schema(example = "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984")]
    pub to_address: String,
    #[validate(length(min = 1))]
    #[schema(example = "FOXYA")]
    pub currency_code: String,
    #[validate(length(min = 1))]
    #[schema(example = "ETH")]
    pub chain: String,
    #[validate(length(min = 1))]
    #[schema(example = "50")]
    pub amount: String,
    pub memo: Option<String>,
    pub cid: Option<String>,
}

/// Transfer summary returned by the create and lookup endpoints
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub transfer_id: String,
    /// INTERNAL | EXTERNAL
    pub kind: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub currency_id: i32,
    pub amount: String,
    pub fee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Millisecond epoch
    pub created_at: i64,
}

/// One row of GET /api/v1/transfers/history
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub transfer_id: String,
    pub kind: String,
    pub status: String,
    pub currency_id: i32,
    pub amount: String,
    pub fee: String,
    pub created_at: i64,
}

// ============================================================================
// Persistence records
// ============================================================================

/// Internal transfer row
#[derive(Debug, Clone)]
pub struct InternalTransferRecord {
    pub transfer_id: TransferId,
    pub cid: Option<String>,
    pub sender_id: i64,
    pub sender_wallet_id: i64,
    pub receiver_id: i64,
    pub receiver_wallet_id: i64,
    pub currency_id: i32,
    pub amount: Decimal,
    pub fee: Decimal,
    pub status: InternalStatus,
    pub kind: InternalKind,
    pub memo: Option<String>,
    pub request_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// External transfer (withdrawal) row
#[derive(Debug, Clone)]
pub struct ExternalTransferRecord {
    pub transfer_id: TransferId,
    pub cid: Option<String>,
    pub user_id: i64,
    pub wallet_id: i64,
    pub currency_id: i32,
    pub to_address: String,
    pub chain: String,
    pub amount: Decimal,
    pub fee: Decimal,
    /// Filled in by the settlement worker at submit time
    pub network_fee: Option<Decimal>,
    pub status: ExternalStatus,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub required_confirmations: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Union of the two transfer kinds, for id lookup
#[derive(Debug, Clone)]
pub enum TransferRecord {
    Internal(InternalTransferRecord),
    External(ExternalTransferRecord),
}

impl InternalTransferRecord {
    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            transfer_id: self.transfer_id.to_string(),
            kind: "INTERNAL".to_string(),
            status: self.status.as_str().to_string(),
            sender_id: Some(self.sender_id),
            receiver_id: Some(self.receiver_id),
            user_id: None,
            currency_id: self.currency_id,
            amount: self.amount.to_string(),
            fee: self.fee.to_string(),
            to_address: None,
            chain: None,
            tx_hash: None,
            created_at: self.created_at.timestamp_millis(),
        }
    }
}

impl ExternalTransferRecord {
    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            transfer_id: self.transfer_id.to_string(),
            kind: "EXTERNAL".to_string(),
            status: self.status.as_str().to_string(),
            sender_id: None,
            receiver_id: None,
            user_id: Some(self.user_id),
            currency_id: self.currency_id,
            amount: self.amount.to_string(),
            fee: self.fee.to_string(),
            to_address: Some(self.to_address.clone()),
            chain: Some(self.chain.clone()),
            tx_hash: self.tx_hash.clone(),
            created_at: self.created_at.timestamp_millis(),
        }
    }
}

impl TransferRecord {
    pub fn summary(&self) -> TransferSummary {
        match self {
            TransferRecord::Internal(r) => r.summary(),
            TransferRecord::External(r) => r.summary(),
        }
    }
}

// ============================================================================
// Repository inputs
// ============================================================================

/// Parameters for creating an internal transfer
#[derive(Debug, Clone)]
pub struct NewInternalTransfer {
    pub transfer_id: TransferId,
    pub cid: Option<String>,
    pub sender_id: i64,
    pub sender_wallet_id: i64,
    pub receiver_id: i64,
    pub receiver_wallet_id: i64,
    pub currency_id: i32,
    pub amount: Decimal,
    pub fee: Decimal,
    pub kind: InternalKind,
    pub memo: Option<String>,
    pub request_ip: Option<String>,
    /// Treasury wallet credited with the fee, if the fee sink is configured so
    pub fee_wallet_id: Option<i64>,
}

/// Parameters for creating an external transfer
#[derive(Debug, Clone)]
pub struct NewExternalTransfer {
    pub transfer_id: TransferId,
    pub cid: Option<String>,
    pub user_id: i64,
    pub wallet_id: i64,
    pub currency_id: i32,
    pub to_address: String,
    pub chain: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub required_confirmations: i32,
    pub memo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_roundtrip() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_receiver_ref_parse() {
        assert_eq!(
            ReceiverRef::parse("ADDRESS", "0xabc").unwrap(),
            ReceiverRef::Address("0xabc".to_string())
        );
        assert_eq!(
            ReceiverRef::parse("REFERRAL_CODE", "FOXY-1").unwrap(),
            ReceiverRef::ReferralCode("FOXY-1".to_string())
        );
        assert_eq!(
            ReceiverRef::parse("USER_ID", "77").unwrap(),
            ReceiverRef::UserId(77)
        );
    }

    #[test]
    fn test_receiver_ref_rejects_unknown_type_and_bad_user_id() {
        assert!(matches!(
            ReceiverRef::parse("EMAIL", "a@b.c"),
            Err(TransferError::InvalidReceiverType(_))
        ));
        assert!(matches!(
            ReceiverRef::parse("USER_ID", "not-a-number"),
            Err(TransferError::InvalidReceiverType(_))
        ));
    }

    #[test]
    fn test_summary_camel_case_wire_format() {
        let record = InternalTransferRecord {
            transfer_id: TransferId::new(),
            cid: None,
            sender_id: 1,
            sender_wallet_id: 10,
            receiver_id: 2,
            receiver_wallet_id: 20,
            currency_id: 1,
            amount: Decimal::from(100),
            fee: Decimal::new(1, 1),
            status: InternalStatus::Completed,
            kind: InternalKind::Internal,
            memo: None,
            request_ip: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(record.summary()).unwrap();
        assert_eq!(json["kind"], "INTERNAL");
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["senderId"], 1);
        assert_eq!(json["fee"], "0.1");
        assert!(json.get("toAddress").is_none());
    }
}
