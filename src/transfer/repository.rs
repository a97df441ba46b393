//! Transfer persistence layer
//!
//! All multi-step mutations (debit+credit+insert, lock+insert, and the fused
//! state-transition+unlock pairs) run inside a single database transaction, so
//! a crash mid-sequence leaves either all or none of the effects visible.
//! State transitions are atomic CAS updates keyed on the expected status.

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::wallet::WalletStore;

use super::error::TransferError;
use super::state::{ExternalStatus, InternalKind, InternalStatus};
use super::types::{
    ExternalTransferRecord, HistoryEntry, InternalTransferRecord, NewExternalTransfer,
    NewInternalTransfer, TransferId, TransferRecord,
};

const INTERNAL_COLUMNS: &str = "transfer_id, cid, sender_id, sender_wallet_id, receiver_id, \
     receiver_wallet_id, currency_id, amount, fee, status, kind, memo, request_ip, \
     created_at, updated_at";

const EXTERNAL_COLUMNS: &str = "transfer_id, cid, user_id, wallet_id, currency_id, to_address, \
     chain, amount, fee, network_fee, status, tx_hash, confirmations, required_confirmations, \
     error_code, error_message, retry_count, memo, created_at, updated_at";

/// Transfer repository over the wallet ledger
pub struct TransferRepo {
    pool: PgPool,
}

impl TransferRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create an internal transfer: conditional debit of amount+fee from the
    /// sender, credit of amount to the receiver, optional fee credit to the
    /// treasury wallet, and the COMPLETED row insert, all in one transaction.
    ///
    /// Idempotent on `cid`: a retry with the same cid returns the existing
    /// record instead of moving money twice.
    pub async fn create_internal(
        &self,
        new: NewInternalTransfer,
    ) -> Result<InternalTransferRecord, TransferError> {
        if let Some(cid) = &new.cid {
            if let Some(existing) = self.get_internal_by_cid(cid).await? {
                tracing::info!(
                    transfer_id = %existing.transfer_id,
                    cid = %cid,
                    "Internal transfer with cid already exists - returning existing record"
                );
                return Ok(existing);
            }
        }

        let total_debit = new.amount + new.fee;
        let mut tx = self.pool.begin().await?;

        // Crossed transfers (A->B and B->A) would otherwise take the wallet
        // row locks in opposite orders and deadlock; locking in id order
        // first makes the acquisition order deterministic.
        let mut lock_ids = vec![new.sender_wallet_id, new.receiver_wallet_id];
        if new.fee > Decimal::ZERO {
            if let Some(fee_wallet_id) = new.fee_wallet_id {
                lock_ids.push(fee_wallet_id);
            }
        }
        lock_ids.sort_unstable();
        lock_ids.dedup();
        for wallet_id in lock_ids {
            sqlx::query("SELECT id FROM user_wallets WHERE id = $1 FOR UPDATE")
                .bind(wallet_id)
                .execute(&mut *tx)
                .await?;
        }

        let debited = WalletStore::debit(&mut *tx, new.sender_wallet_id, total_debit).await?;
        if debited.is_none() {
            // Lost the race to a concurrent spend; surface the live balance
            drop(tx);
            let available = self.wallet_balance(new.sender_wallet_id).await?;
            return Err(TransferError::InsufficientFunds {
                required: total_debit,
                available,
            });
        }

        WalletStore::credit(&mut *tx, new.receiver_wallet_id, new.amount)
            .await?
            .ok_or(TransferError::WalletNotFound)?;

        if new.fee > Decimal::ZERO {
            if let Some(fee_wallet_id) = new.fee_wallet_id {
                WalletStore::credit(&mut *tx, fee_wallet_id, new.fee)
                    .await?
                    .ok_or(TransferError::WalletNotFound)?;
            }
        }

        let insert = sqlx::query(&format!(
            r#"INSERT INTO internal_transfers
                   (transfer_id, cid, sender_id, sender_wallet_id, receiver_id,
                    receiver_wallet_id, currency_id, amount, fee, status, kind,
                    memo, request_ip)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               RETURNING {INTERNAL_COLUMNS}"#
        ))
        .bind(new.transfer_id.to_string())
        .bind(&new.cid)
        .bind(new.sender_id)
        .bind(new.sender_wallet_id)
        .bind(new.receiver_id)
        .bind(new.receiver_wallet_id)
        .bind(new.currency_id)
        .bind(new.amount)
        .bind(new.fee)
        .bind(InternalStatus::Completed.id())
        .bind(new.kind.id())
        .bind(&new.memo)
        .bind(&new.request_ip)
        .fetch_one(&mut *tx)
        .await;

        let row = match insert {
            Ok(row) => row,
            // Lost the cid race to a concurrent request between the lookup
            // above and this insert; the rollback undoes our balance moves
            // and the winner's record is returned instead.
            Err(e) if is_unique_violation(&e) && new.cid.is_some() => {
                drop(tx);
                let cid = new.cid.as_deref().unwrap_or_default();
                return self
                    .get_internal_by_cid(cid)
                    .await?
                    .ok_or_else(|| TransferError::Database(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let record = row_to_internal(&row)?;
        tx.commit().await?;

        Ok(record)
    }

    /// Create an external transfer: conditional lock of amount+fee and the
    /// PENDING row insert in one transaction. Idempotent on `cid`.
    pub async fn create_external(
        &self,
        new: NewExternalTransfer,
    ) -> Result<ExternalTransferRecord, TransferError> {
        if let Some(cid) = &new.cid {
            if let Some(existing) = self.get_external_by_cid(cid).await? {
                tracing::info!(
                    transfer_id = %existing.transfer_id,
                    cid = %cid,
                    "External transfer with cid already exists - returning existing record"
                );
                return Ok(existing);
            }
        }

        let total_lock = new.amount + new.fee;
        let mut tx = self.pool.begin().await?;

        let locked = WalletStore::lock(&mut *tx, new.wallet_id, total_lock).await?;
        if locked.is_none() {
            drop(tx);
            let available = self.wallet_balance(new.wallet_id).await?;
            return Err(TransferError::InsufficientFunds {
                required: total_lock,
                available,
            });
        }

        let insert = sqlx::query(&format!(
            r#"INSERT INTO external_transfers
                   (transfer_id, cid, user_id, wallet_id, currency_id, to_address,
                    chain, amount, fee, status, required_confirmations, memo)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING {EXTERNAL_COLUMNS}"#
        ))
        .bind(new.transfer_id.to_string())
        .bind(&new.cid)
        .bind(new.user_id)
        .bind(new.wallet_id)
        .bind(new.currency_id)
        .bind(&new.to_address)
        .bind(&new.chain)
        .bind(new.amount)
        .bind(new.fee)
        .bind(ExternalStatus::Pending.id())
        .bind(new.required_confirmations)
        .bind(&new.memo)
        .fetch_one(&mut *tx)
        .await;

        let row = match insert {
            Ok(row) => row,
            // Concurrent request with the same cid won the insert; rolling
            // back releases our lock and the winner's record stands.
            Err(e) if is_unique_violation(&e) && new.cid.is_some() => {
                drop(tx);
                let cid = new.cid.as_deref().unwrap_or_default();
                return self
                    .get_external_by_cid(cid)
                    .await?
                    .ok_or_else(|| TransferError::Database(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let record = row_to_external(&row)?;
        tx.commit().await?;

        Ok(record)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub async fn get_internal(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<InternalTransferRecord>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {INTERNAL_COLUMNS} FROM internal_transfers WHERE transfer_id = $1"
        ))
        .bind(transfer_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_internal).transpose()
    }

    pub async fn get_external(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<ExternalTransferRecord>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {EXTERNAL_COLUMNS} FROM external_transfers WHERE transfer_id = $1"
        ))
        .bind(transfer_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_external).transpose()
    }

    /// Union lookup across both transfer tables
    pub async fn get(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<TransferRecord>, TransferError> {
        if let Some(internal) = self.get_internal(transfer_id).await? {
            return Ok(Some(TransferRecord::Internal(internal)));
        }
        Ok(self
            .get_external(transfer_id)
            .await?
            .map(TransferRecord::External))
    }

    async fn get_internal_by_cid(
        &self,
        cid: &str,
    ) -> Result<Option<InternalTransferRecord>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {INTERNAL_COLUMNS} FROM internal_transfers WHERE cid = $1"
        ))
        .bind(cid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_internal).transpose()
    }

    async fn get_external_by_cid(
        &self,
        cid: &str,
    ) -> Result<Option<ExternalTransferRecord>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {EXTERNAL_COLUMNS} FROM external_transfers WHERE cid = $1"
        ))
        .bind(cid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_external).transpose()
    }

    /// The caller's transfers across both tables, newest first
    pub async fn history(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<HistoryEntry>, TransferError> {
        let rows = sqlx::query(
            r#"
            SELECT transfer_id, 'INTERNAL' AS kind, status, currency_id, amount, fee, created_at
            FROM internal_transfers
            WHERE sender_id = $1 OR receiver_id = $1
            UNION ALL
            SELECT transfer_id, 'EXTERNAL' AS kind, status, currency_id, amount, fee, created_at
            FROM external_transfers
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get("kind");
            let status_id: i16 = row.get("status");
            let status = if kind == "INTERNAL" {
                InternalStatus::from_id(status_id)
                    .map(|s| s.as_str())
                    .unwrap_or("UNKNOWN")
            } else {
                ExternalStatus::from_id(status_id)
                    .map(|s| s.as_str())
                    .unwrap_or("UNKNOWN")
            };
            let amount: Decimal = row.get("amount");
            let fee: Decimal = row.get("fee");
            let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");

            entries.push(HistoryEntry {
                transfer_id: row.get("transfer_id"),
                kind,
                status: status.to_string(),
                currency_id: row.get("currency_id"),
                amount: amount.to_string(),
                fee: fee.to_string(),
                created_at: created_at.timestamp_millis(),
            });
        }

        Ok(entries)
    }

    // ========================================================================
    // External state machine (driven by the settlement worker)
    // ========================================================================

    /// PENDING -> PROCESSING; the worker claims the withdrawal
    pub async fn mark_processing(&self, transfer_id: TransferId) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"UPDATE external_transfers
               SET status = $1, updated_at = NOW()
               WHERE transfer_id = $2 AND status = $3"#,
        )
        .bind(ExternalStatus::Processing.id())
        .bind(transfer_id.to_string())
        .bind(ExternalStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// PENDING|PROCESSING -> SUBMITTED; records the broadcast tx hash and the
    /// network fee the worker paid
    pub async fn submit(
        &self,
        transfer_id: TransferId,
        tx_hash: &str,
        network_fee: Option<Decimal>,
    ) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"UPDATE external_transfers
               SET status = $1, tx_hash = $2, network_fee = $3, updated_at = NOW()
               WHERE transfer_id = $4 AND status IN ($5, $6)"#,
        )
        .bind(ExternalStatus::Submitted.id())
        .bind(tx_hash)
        .bind(network_fee)
        .bind(transfer_id.to_string())
        .bind(ExternalStatus::Pending.id())
        .bind(ExternalStatus::Processing.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Refresh the observed confirmation count while SUBMITTED
    pub async fn record_confirmations(
        &self,
        transfer_id: TransferId,
        confirmations: i32,
    ) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"UPDATE external_transfers
               SET confirmations = $1, updated_at = NOW()
               WHERE transfer_id = $2 AND status = $3"#,
        )
        .bind(confirmations)
        .bind(transfer_id.to_string())
        .bind(ExternalStatus::Submitted.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// SUBMITTED -> CONFIRMED with the final confirmation count
    pub async fn confirm(
        &self,
        transfer_id: TransferId,
        confirmations: i32,
    ) -> Result<bool, TransferError> {
        let result = sqlx::query(
            r#"UPDATE external_transfers
               SET status = $1, confirmations = $2, updated_at = NOW()
               WHERE transfer_id = $3 AND status = $4"#,
        )
        .bind(ExternalStatus::Confirmed.id())
        .bind(confirmations)
        .bind(transfer_id.to_string())
        .bind(ExternalStatus::Submitted.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// CONFIRMED -> COMPLETED, dropping the locked amount in the same
    /// transaction: the funds already left the system, nothing is refunded.
    pub async fn complete(&self, transfer_id: TransferId) -> Result<(), TransferError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"UPDATE external_transfers
               SET status = $1, updated_at = NOW()
               WHERE transfer_id = $2 AND status = $3
               RETURNING wallet_id, amount, fee"#,
        )
        .bind(ExternalStatus::Completed.id())
        .bind(transfer_id.to_string())
        .bind(ExternalStatus::Confirmed.id())
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                drop(tx);
                return Err(self.transition_failure(transfer_id, "COMPLETED").await?);
            }
        };

        let wallet_id: i64 = row.get("wallet_id");
        let amount: Decimal = row.get("amount");
        let fee: Decimal = row.get("fee");

        WalletStore::unlock(&mut *tx, wallet_id, amount + fee, false)
            .await?
            .ok_or_else(|| {
                TransferError::Database(format!(
                    "locked balance underflow releasing transfer {transfer_id}"
                ))
            })?;

        tx.commit().await?;
        Ok(())
    }

    /// Any non-terminal state -> FAILED, refunding the locked amount back to
    /// the available balance in the same transaction.
    pub async fn fail_and_refund(
        &self,
        transfer_id: TransferId,
        error_code: &str,
        error_message: &str,
    ) -> Result<(), TransferError> {
        self.terminate_and_refund(
            transfer_id,
            ExternalStatus::Failed,
            Some((error_code, error_message)),
        )
        .await
    }

    /// Any non-terminal state -> CANCELLED, refunding the locked amount.
    pub async fn cancel_and_refund(&self, transfer_id: TransferId) -> Result<(), TransferError> {
        self.terminate_and_refund(transfer_id, ExternalStatus::Cancelled, None)
            .await
    }

    async fn terminate_and_refund(
        &self,
        transfer_id: TransferId,
        terminal: ExternalStatus,
        error: Option<(&str, &str)>,
    ) -> Result<(), TransferError> {
        debug_assert!(matches!(
            terminal,
            ExternalStatus::Failed | ExternalStatus::Cancelled
        ));

        let mut tx = self.pool.begin().await?;

        let (error_code, error_message) = match error {
            Some((code, message)) => (Some(code), Some(message)),
            None => (None, None),
        };

        let row = sqlx::query(
            r#"UPDATE external_transfers
               SET status = $1,
                   error_code = COALESCE($2, error_code),
                   error_message = COALESCE($3, error_message),
                   updated_at = NOW()
               WHERE transfer_id = $4 AND status NOT IN ($5, $6, $7)
               RETURNING wallet_id, amount, fee"#,
        )
        .bind(terminal.id())
        .bind(error_code)
        .bind(error_message)
        .bind(transfer_id.to_string())
        .bind(ExternalStatus::Completed.id())
        .bind(ExternalStatus::Failed.id())
        .bind(ExternalStatus::Cancelled.id())
        .fetch_optional(&mut *tx)
        .await?;

        let row = match row {
            Some(row) => row,
            None => {
                drop(tx);
                return Err(self.transition_failure(transfer_id, terminal.as_str()).await?);
            }
        };

        let wallet_id: i64 = row.get("wallet_id");
        let amount: Decimal = row.get("amount");
        let fee: Decimal = row.get("fee");

        WalletStore::unlock(&mut *tx, wallet_id, amount + fee, true)
            .await?
            .ok_or_else(|| {
                TransferError::Database(format!(
                    "locked balance underflow refunding transfer {transfer_id}"
                ))
            })?;

        tx.commit().await?;

        tracing::info!(
            transfer_id = %transfer_id,
            status = %terminal,
            "External transfer terminated and lock refunded"
        );
        Ok(())
    }

    /// Build the error for a CAS that matched no row: either the transfer does
    /// not exist, or it is in a state the transition is not valid from.
    async fn transition_failure(
        &self,
        transfer_id: TransferId,
        to: &'static str,
    ) -> Result<TransferError, TransferError> {
        match self.get_external(transfer_id).await? {
            None => Ok(TransferError::TransferNotFound(transfer_id.to_string())),
            Some(record) => Ok(TransferError::InvalidStateTransition {
                from: record.status.as_str(),
                to,
            }),
        }
    }

    /// Increment the settlement retry counter
    pub async fn increment_retry(&self, transfer_id: TransferId) -> Result<(), TransferError> {
        sqlx::query(
            r#"UPDATE external_transfers
               SET retry_count = retry_count + 1, updated_at = NOW()
               WHERE transfer_id = $1"#,
        )
        .bind(transfer_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// PENDING withdrawals older than `threshold_secs`, for the reconciliation
    /// sweep that recovers transfers whose outbox event was lost.
    pub async fn find_stale_pending(
        &self,
        threshold_secs: i64,
        batch: i64,
    ) -> Result<Vec<ExternalTransferRecord>, TransferError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {EXTERNAL_COLUMNS}
               FROM external_transfers
               WHERE status = $1
                 AND created_at < NOW() - INTERVAL '1 second' * $2
               ORDER BY created_at ASC
               LIMIT $3"#
        ))
        .bind(ExternalStatus::Pending.id())
        .bind(threshold_secs)
        .bind(batch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_external).collect()
    }

    async fn wallet_balance(&self, wallet_id: i64) -> Result<Decimal, TransferError> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM user_wallets WHERE id = $1")
                .bind(wallet_id)
                .fetch_optional(&self.pool)
                .await?;

        balance.ok_or(TransferError::WalletNotFound)
    }
}

/// Unique-constraint violation (SQLSTATE 23505), the signature of losing an
/// insert race on `cid`
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn parse_transfer_id(raw: &str) -> Result<TransferId, TransferError> {
    raw.parse()
        .map_err(|_| TransferError::Database(format!("Invalid transfer_id in row: {raw}")))
}

fn row_to_internal(row: &PgRow) -> Result<InternalTransferRecord, TransferError> {
    let status_id: i16 = row.get("status");
    let kind_id: i16 = row.get("kind");

    Ok(InternalTransferRecord {
        transfer_id: parse_transfer_id(row.get("transfer_id"))?,
        cid: row.get("cid"),
        sender_id: row.get("sender_id"),
        sender_wallet_id: row.get("sender_wallet_id"),
        receiver_id: row.get("receiver_id"),
        receiver_wallet_id: row.get("receiver_wallet_id"),
        currency_id: row.get("currency_id"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        status: InternalStatus::from_id(status_id)
            .ok_or_else(|| TransferError::Database(format!("Invalid status id: {status_id}")))?,
        kind: InternalKind::from_id(kind_id)
            .ok_or_else(|| TransferError::Database(format!("Invalid kind id: {kind_id}")))?,
        memo: row.get("memo"),
        request_ip: row.get("request_ip"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_external(row: &PgRow) -> Result<ExternalTransferRecord, TransferError> {
    let status_id: i16 = row.get("status");

    Ok(ExternalTransferRecord {
        transfer_id: parse_transfer_id(row.get("transfer_id"))?,
        cid: row.get("cid"),
        user_id: row.get("user_id"),
        wallet_id: row.get("wallet_id"),
        currency_id: row.get("currency_id"),
        to_address: row.get("to_address"),
        chain: row.get("chain"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        network_fee: row.get("network_fee"),
        status: ExternalStatus::from_id(status_id)
            .ok_or_else(|| TransferError::Database(format!("Invalid status id: {status_id}")))?,
        tx_hash: row.get("tx_hash"),
        confirmations: row.get("confirmations"),
        required_confirmations: row.get("required_confirmations"),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        memo: row.get("memo"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
