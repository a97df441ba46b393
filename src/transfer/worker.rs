//! Reconciliation worker
//!
//! Periodic sweep over PENDING withdrawals older than the staleness
//! threshold. Their settlement event is appended after the database commit,
//! so a crash in that window strands the row with no event; the sweep
//! re-emits it. Duplicate emission is harmless, settlement consumers are
//! idempotent on transfer id.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReconciliationConfig;

use super::service::TransferService;

pub struct ReconciliationWorker {
    service: Arc<TransferService>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(service: Arc<TransferService>, config: ReconciliationConfig) -> Self {
        Self { service, config }
    }

    /// Run the sweep loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.scan_interval_secs);
        info!(
            interval_secs = self.config.scan_interval_secs,
            stale_threshold_secs = self.config.stale_threshold_secs,
            "Starting reconciliation worker"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconciliation worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match self
                .service
                .republish_stale(self.config.stale_threshold_secs as i64, self.config.batch_size)
                .await
            {
                Ok(0) => debug!("Reconciliation sweep found no stale withdrawals"),
                Ok(n) => info!(count = n, "Reconciliation sweep republished withdrawals"),
                Err(e) => warn!(error = %e, "Reconciliation sweep failed"),
            }
        }
    }
}
