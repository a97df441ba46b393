//! Transfer orchestration
//!
//! Validates and resolves a wire request into repository inputs, invokes the
//! atomic persistence step, and emits outbox events. Validation is strictly
//! before mutation; event emission is strictly after commit, so a crash can
//! lose an event but never a ledger write (the reconciliation sweep re-emits
//! lost withdrawal events).

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::config::{FeeSink, TransferConfig};
use crate::currency::{Currency, CurrencyManager};
use crate::outbox::{Event, EventKind, EventOutbox, payload};
use crate::wallet::WalletStore;

use super::error::TransferError;
use super::repository::TransferRepo;
use super::resolver::{ReceiverDirectory, resolve_receiver};
use super::state::InternalKind;
use super::types::{
    ExternalTransferRequest, HistoryEntry, InternalTransferRequest, NewExternalTransfer,
    NewInternalTransfer, ReceiverRef, TransferId, TransferSummary,
};

/// History page size bounds
const HISTORY_DEFAULT_LIMIT: i64 = 20;
const HISTORY_MAX_LIMIT: i64 = 100;

/// Caller identity established by the auth layer
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: i64,
    /// Grants the direct user-id receiver path and admin transfer kinds
    pub elevated: bool,
}

pub struct TransferService {
    repo: TransferRepo,
    outbox: EventOutbox,
    directory: Arc<dyn ReceiverDirectory>,
    config: TransferConfig,
}

impl TransferService {
    pub fn new(
        repo: TransferRepo,
        outbox: EventOutbox,
        directory: Arc<dyn ReceiverDirectory>,
        config: TransferConfig,
    ) -> Self {
        Self {
            repo,
            outbox,
            directory,
            config,
        }
    }

    pub fn repo(&self) -> &TransferRepo {
        &self.repo
    }

    /// Execute an internal transfer for `caller`.
    ///
    /// The ledger write is atomic; the completion event afterwards is
    /// fire-and-forget notification only.
    pub async fn internal_transfer(
        &self,
        caller: Caller,
        request_ip: Option<String>,
        req: &InternalTransferRequest,
    ) -> Result<TransferSummary, TransferError> {
        let receiver = ReceiverRef::parse(&req.receiver_type, &req.receiver_value)?;
        let amount = parse_amount(&req.amount, self.config.min_internal_amount)?;

        let currency = self.currency_by_code(&req.currency_code).await?;
        let receiver_id =
            resolve_receiver(self.directory.as_ref(), &receiver, caller.elevated).await?;
        if receiver_id == caller.user_id {
            return Err(TransferError::SelfTransfer);
        }

        let sender_wallet = self.wallet_of(caller.user_id, currency.currency_id).await?;
        let receiver_wallet = self.wallet_of(receiver_id, currency.currency_id).await?;

        let fee = self.fee_for(amount, &currency);
        let fee_wallet_id = match self.config.fee_sink {
            FeeSink::Burn => None,
            FeeSink::Treasury { wallet_id } => Some(wallet_id),
        };

        let record = self
            .repo
            .create_internal(NewInternalTransfer {
                transfer_id: TransferId::new(),
                cid: req.cid.clone(),
                sender_id: caller.user_id,
                sender_wallet_id: sender_wallet,
                receiver_id,
                receiver_wallet_id: receiver_wallet,
                currency_id: currency.currency_id,
                amount,
                fee,
                kind: InternalKind::Internal,
                memo: req.memo.clone(),
                request_ip,
                fee_wallet_id,
            })
            .await?;

        tracing::info!(
            transfer_id = %record.transfer_id,
            sender_id = record.sender_id,
            receiver_id = record.receiver_id,
            amount = %record.amount,
            fee = %record.fee,
            "Internal transfer completed"
        );

        let event = Event::new(
            EventKind::TransferCompleted,
            payload(&[
                ("transferId", record.transfer_id.to_string()),
                ("senderId", record.sender_id.to_string()),
                ("receiverId", record.receiver_id.to_string()),
                ("currencyId", record.currency_id.to_string()),
                ("amount", record.amount.to_string()),
                ("fee", record.fee.to_string()),
            ]),
        );
        if let Err(e) = self.outbox.publish(&event).await {
            tracing::warn!(
                transfer_id = %record.transfer_id,
                error = %e,
                "Failed to publish transfer-completed notification"
            );
        }

        Ok(record.summary())
    }

    /// Create an external withdrawal for `caller`.
    ///
    /// Funds are locked and the PENDING row committed first; only then is the
    /// settlement event appended to the durable stream. A lost event leaves a
    /// PENDING row the reconciliation sweep picks up.
    pub async fn external_transfer(
        &self,
        caller: Caller,
        req: &ExternalTransferRequest,
    ) -> Result<TransferSummary, TransferError> {
        let amount = parse_amount(&req.amount, self.config.min_withdrawal_amount)?;

        let currency =
            CurrencyManager::get_by_code_and_chain(self.repo.pool(), &req.currency_code, &req.chain)
                .await?
                .ok_or_else(|| {
                    TransferError::CurrencyNotFound(format!(
                        "{} on {}",
                        req.currency_code, req.chain
                    ))
                })?;

        let wallet_id = self.wallet_of(caller.user_id, currency.currency_id).await?;
        let fee = self.fee_for(amount, &currency);

        let record = self
            .repo
            .create_external(NewExternalTransfer {
                transfer_id: TransferId::new(),
                cid: req.cid.clone(),
                user_id: caller.user_id,
                wallet_id,
                currency_id: currency.currency_id,
                to_address: req.to_address.clone(),
                chain: req.chain.clone(),
                amount,
                fee,
                required_confirmations: self.config.confirmations_for(&req.chain),
                memo: req.memo.clone(),
            })
            .await?;

        tracing::info!(
            transfer_id = %record.transfer_id,
            user_id = record.user_id,
            chain = %record.chain,
            amount = %record.amount,
            "Withdrawal created, awaiting settlement"
        );

        if let Err(e) = self.publish_withdrawal_requested(&record.summary()).await {
            // Recovered by the reconciliation sweep over stale PENDING rows
            tracing::error!(
                transfer_id = %record.transfer_id,
                error = %e,
                "Failed to append withdrawal event after commit"
            );
        }

        Ok(record.summary())
    }

    /// The caller's transfer history, newest first
    pub async fn history(
        &self,
        caller: Caller,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<HistoryEntry>, TransferError> {
        let limit = limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .clamp(1, HISTORY_MAX_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        self.repo.history(caller.user_id, limit, offset).await
    }

    /// Look a transfer up by id. An unparseable id is treated as absent, the
    /// same as an unknown one.
    pub async fn get(&self, raw_id: &str) -> Result<Option<TransferSummary>, TransferError> {
        let Ok(transfer_id) = raw_id.parse::<TransferId>() else {
            return Ok(None);
        };
        Ok(self.repo.get(transfer_id).await?.map(|r| r.summary()))
    }

    /// Re-emit settlement events for PENDING withdrawals older than the
    /// staleness threshold. Returns how many were republished.
    pub async fn republish_stale(
        &self,
        threshold_secs: i64,
        batch: i64,
    ) -> Result<usize, TransferError> {
        let stale = self.repo.find_stale_pending(threshold_secs, batch).await?;
        let mut republished = 0;

        for record in stale {
            self.repo.increment_retry(record.transfer_id).await?;
            match self.publish_withdrawal_requested(&record.summary()).await {
                Ok(()) => {
                    republished += 1;
                    tracing::info!(
                        transfer_id = %record.transfer_id,
                        retry_count = record.retry_count + 1,
                        "Republished stale withdrawal event"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        transfer_id = %record.transfer_id,
                        error = %e,
                        "Failed to republish stale withdrawal event"
                    );
                }
            }
        }

        Ok(republished)
    }

    async fn publish_withdrawal_requested(
        &self,
        summary: &TransferSummary,
    ) -> Result<(), TransferError> {
        let mut pairs = vec![
            ("transferId", summary.transfer_id.clone()),
            ("currencyId", summary.currency_id.to_string()),
            ("amount", summary.amount.clone()),
            ("fee", summary.fee.clone()),
        ];
        if let Some(user_id) = summary.user_id {
            pairs.push(("userId", user_id.to_string()));
        }
        if let Some(chain) = &summary.chain {
            pairs.push(("chain", chain.clone()));
        }
        if let Some(to_address) = &summary.to_address {
            pairs.push(("toAddress", to_address.clone()));
        }

        let event = Event::new(EventKind::WithdrawalRequested, payload(&pairs));
        self.outbox
            .publish_to_stream(&event)
            .await
            .map_err(|e| TransferError::Outbox(e.to_string()))?;
        Ok(())
    }

    async fn currency_by_code(&self, code: &str) -> Result<Currency, TransferError> {
        CurrencyManager::get_by_code(self.repo.pool(), code)
            .await?
            .ok_or_else(|| TransferError::CurrencyNotFound(code.to_string()))
    }

    async fn wallet_of(&self, user_id: i64, currency_id: i32) -> Result<i64, TransferError> {
        let wallet = WalletStore::get(self.repo.pool(), user_id, currency_id)
            .await?
            .ok_or(TransferError::WalletNotFound)?;
        Ok(wallet.id)
    }

    /// Fee at the configured rate, rounded to the currency's precision
    fn fee_for(&self, amount: Decimal, currency: &Currency) -> Decimal {
        (amount * self.config.fee_rate).round_dp(currency.decimals as u32)
    }
}

/// Parse a wire amount string and enforce the positivity and minimum rules
pub(crate) fn parse_amount(raw: &str, min: Decimal) -> Result<Decimal, TransferError> {
    let amount = Decimal::from_str(raw.trim()).map_err(|_| TransferError::InvalidAmountFormat)?;
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount);
    }
    if amount < min {
        return Err(TransferError::AmountBelowMinimum { min });
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_accepts_decimal_strings() {
        let amount = parse_amount("100.5", Decimal::ONE).unwrap();
        assert_eq!(amount, Decimal::new(1005, 1));

        let trimmed = parse_amount(" 2 ", Decimal::ONE).unwrap();
        assert_eq!(trimmed, Decimal::from(2));
    }

    #[test]
    fn test_parse_amount_rejects_garbage_and_nonpositive() {
        assert!(matches!(
            parse_amount("abc", Decimal::ONE),
            Err(TransferError::InvalidAmountFormat)
        ));
        assert!(matches!(
            parse_amount("0", Decimal::ONE),
            Err(TransferError::InvalidAmount)
        ));
        assert!(matches!(
            parse_amount("-5", Decimal::ONE),
            Err(TransferError::InvalidAmount)
        ));
    }

    #[test]
    fn test_parse_amount_enforces_minimum() {
        let err = parse_amount("0.5", Decimal::ONE).unwrap_err();
        assert!(matches!(
            err,
            TransferError::AmountBelowMinimum { min } if min == Decimal::ONE
        ));

        // Exactly the minimum passes
        assert!(parse_amount("1", Decimal::ONE).is_ok());
    }
}
