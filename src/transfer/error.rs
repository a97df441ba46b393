//! Transfer error types

use rust_decimal::Decimal;
use thiserror::Error;

/// Transfer error taxonomy
///
/// Validation and resolution failures short-circuit before any mutation;
/// mutation-time failures (a lost balance race) abort the enclosing
/// transaction and surface as insufficient funds, never as a generic fault.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Auth ===
    #[error("User not authenticated")]
    Unauthorized,

    #[error("Operation requires elevated privileges")]
    Forbidden,

    // === Validation ===
    #[error("Sender and receiver cannot be the same user")]
    SelfTransfer,

    #[error("Invalid receiver type: {0}")]
    InvalidReceiverType(String),

    #[error("Invalid amount format")]
    InvalidAmountFormat,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount is below the minimum of {min}")]
    AmountBelowMinimum { min: Decimal },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    // === Resolution ===
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    #[error("Receiver not found")]
    ReceiverNotFound,

    #[error("Wallet not found for this currency")]
    WalletNotFound,

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // === State machine ===
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    // === System ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Outbox error: {0}")]
    Outbox(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Unauthorized => "UNAUTHORIZED",
            TransferError::Forbidden => "FORBIDDEN",
            TransferError::SelfTransfer => "SELF_TRANSFER",
            TransferError::InvalidReceiverType(_) => "INVALID_RECEIVER_TYPE",
            TransferError::InvalidAmountFormat => "INVALID_AMOUNT_FORMAT",
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::AmountBelowMinimum { .. } => "AMOUNT_BELOW_MINIMUM",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            TransferError::ReceiverNotFound => "RECEIVER_NOT_FOUND",
            TransferError::WalletNotFound => "WALLET_NOT_FOUND",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            TransferError::Database(_) => "DATABASE_ERROR",
            TransferError::Outbox(_) => "OUTBOX_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Unauthorized => 401,
            TransferError::Forbidden => 403,
            TransferError::SelfTransfer
            | TransferError::InvalidReceiverType(_)
            | TransferError::InvalidAmountFormat
            | TransferError::InvalidAmount
            | TransferError::AmountBelowMinimum { .. }
            | TransferError::InsufficientFunds { .. } => 400,
            TransferError::CurrencyNotFound(_)
            | TransferError::ReceiverNotFound
            | TransferError::WalletNotFound
            | TransferError::TransferNotFound(_) => 404,
            TransferError::InvalidStateTransition { .. } => 409,
            TransferError::Database(_) | TransferError::Outbox(_) => 500,
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::Database(e.to_string())
    }
}

impl From<redis::RedisError> for TransferError {
    fn from(e: redis::RedisError) -> Self {
        TransferError::Outbox(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::SelfTransfer.code(), "SELF_TRANSFER");
        assert_eq!(
            TransferError::InsufficientFunds {
                required: Decimal::from(10),
                available: Decimal::ONE,
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(
            TransferError::CurrencyNotFound("XYZ".into()).code(),
            "CURRENCY_NOT_FOUND"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(TransferError::Unauthorized.http_status(), 401);
        assert_eq!(TransferError::Forbidden.http_status(), 403);
        assert_eq!(
            TransferError::InsufficientFunds {
                required: Decimal::from(10),
                available: Decimal::ONE,
            }
            .http_status(),
            400
        );
        assert_eq!(TransferError::WalletNotFound.http_status(), 404);
        assert_eq!(TransferError::Database("x".into()).http_status(), 500);
    }

    #[test]
    fn test_insufficient_funds_message_names_amounts() {
        let err = TransferError::InsufficientFunds {
            required: Decimal::new(10010, 2),
            available: Decimal::from(100),
        };
        let msg = err.to_string();
        assert!(msg.contains("100.10"));
        assert!(msg.contains("100"));
    }
}
