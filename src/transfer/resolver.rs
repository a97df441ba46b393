//! Receiver resolution
//!
//! Maps a [`ReceiverRef`] to a user id. Behind a trait so the gateway and
//! service tests can stub the directory without a database.

use async_trait::async_trait;
use sqlx::PgPool;

use super::error::TransferError;
use super::types::ReceiverRef;

/// User/wallet-address/referral-code directory
#[async_trait]
pub trait ReceiverDirectory: Send + Sync {
    /// Owning user of a platform deposit address
    async fn user_by_address(&self, address: &str) -> Result<Option<i64>, TransferError>;

    /// User behind a referral code
    async fn user_by_referral_code(&self, code: &str) -> Result<Option<i64>, TransferError>;

    /// Whether a user id exists and is active
    async fn user_exists(&self, user_id: i64) -> Result<bool, TransferError>;
}

/// Resolve a receiver reference to a user id.
///
/// The direct user-id path is reserved for elevated-privilege callers.
pub async fn resolve_receiver(
    directory: &dyn ReceiverDirectory,
    receiver: &ReceiverRef,
    elevated: bool,
) -> Result<i64, TransferError> {
    match receiver {
        ReceiverRef::Address(address) => directory
            .user_by_address(address)
            .await?
            .ok_or(TransferError::ReceiverNotFound),
        ReceiverRef::ReferralCode(code) => directory
            .user_by_referral_code(code)
            .await?
            .ok_or(TransferError::ReceiverNotFound),
        ReceiverRef::UserId(user_id) => {
            if !elevated {
                return Err(TransferError::Forbidden);
            }
            if directory.user_exists(*user_id).await? {
                Ok(*user_id)
            } else {
                Err(TransferError::ReceiverNotFound)
            }
        }
    }
}

/// Directory backed by the platform's users and address tables
pub struct PgReceiverDirectory {
    pool: PgPool,
}

impl PgReceiverDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReceiverDirectory for PgReceiverDirectory {
    async fn user_by_address(&self, address: &str) -> Result<Option<i64>, TransferError> {
        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM user_addresses WHERE address = $1")
                .bind(address)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user_id)
    }

    async fn user_by_referral_code(&self, code: &str) -> Result<Option<i64>, TransferError> {
        let user_id: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM users WHERE referral_code = $1 AND status = 1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user_id)
    }

    async fn user_exists(&self, user_id: i64) -> Result<bool, TransferError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM users WHERE user_id = $1 AND status = 1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// In-memory directory for service tests
    #[derive(Default)]
    pub struct StaticDirectory {
        pub addresses: HashMap<String, i64>,
        pub referral_codes: HashMap<String, i64>,
        pub users: Vec<i64>,
    }

    #[async_trait]
    impl ReceiverDirectory for StaticDirectory {
        async fn user_by_address(&self, address: &str) -> Result<Option<i64>, TransferError> {
            Ok(self.addresses.get(address).copied())
        }

        async fn user_by_referral_code(&self, code: &str) -> Result<Option<i64>, TransferError> {
            Ok(self.referral_codes.get(code).copied())
        }

        async fn user_exists(&self, user_id: i64) -> Result<bool, TransferError> {
            Ok(self.users.contains(&user_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StaticDirectory;
    use super::*;

    fn directory() -> StaticDirectory {
        let mut dir = StaticDirectory::default();
        dir.addresses.insert("0xabc".to_string(), 7);
        dir.referral_codes.insert("FOXY-1".to_string(), 8);
        dir.users = vec![7, 8, 9];
        dir
    }

    #[tokio::test]
    async fn test_resolve_by_address_and_code() {
        let dir = directory();
        let by_addr = resolve_receiver(&dir, &ReceiverRef::Address("0xabc".into()), false)
            .await
            .unwrap();
        assert_eq!(by_addr, 7);

        let by_code = resolve_receiver(&dir, &ReceiverRef::ReferralCode("FOXY-1".into()), false)
            .await
            .unwrap();
        assert_eq!(by_code, 8);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let dir = directory();
        let err = resolve_receiver(&dir, &ReceiverRef::Address("0xdead".into()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ReceiverNotFound));
    }

    #[tokio::test]
    async fn test_user_id_path_requires_elevation() {
        let dir = directory();
        let err = resolve_receiver(&dir, &ReceiverRef::UserId(9), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Forbidden));

        let ok = resolve_receiver(&dir, &ReceiverRef::UserId(9), true)
            .await
            .unwrap();
        assert_eq!(ok, 9);

        let missing = resolve_receiver(&dir, &ReceiverRef::UserId(404), true)
            .await
            .unwrap_err();
        assert!(matches!(missing, TransferError::ReceiverNotFound));
    }
}
