//! Periodic escrow sweep
//!
//! Safe to run from several instances at once: every change it makes goes
//! through the same status compare-and-set as the request handlers, so a
//! transaction considered by two sweeps is completed or cancelled once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::store::Store;
use crate::transaction::{PayoutOutcome, ReceiptActor, TransactionService, TransactionStatus};

const DEFAULT_BATCH_SIZE: i64 = 100;

/// Counts of what one sweep did
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub released: usize,
    pub expired: usize,
    pub reconciled: usize,
    pub payouts_retried: usize,
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct EscrowSweeper {
    store: Arc<dyn Store>,
    transactions: Arc<TransactionService>,
    batch_size: i64,
}

impl EscrowSweeper {
    pub fn new(store: Arc<dyn Store>, transactions: Arc<TransactionService>) -> Self {
        Self {
            store,
            transactions,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass over every time-driven duty
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.release_due(now, &mut report).await;
        self.expire_unpaid(now, &mut report).await;
        self.reconcile_pending(now, &mut report).await;
        self.retry_payouts(&mut report).await;
        report
    }

    async fn release_due(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let due = match self.store.list_due_for_release(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to list transactions due for release");
                report.errors += 1;
                return;
            }
        };

        for tx in due {
            match self
                .transactions
                .confirm_receipt(tx.id, ReceiptActor::System, now)
                .await
            {
                Ok(_) => {
                    info!(transaction_id = tx.id, "Escrow auto-released");
                    report.released += 1;
                }
                // Another worker or the buyer got there first
                Err(ServiceError::AlreadyCompleted(_)) | Err(ServiceError::InvalidState(_)) => {
                    debug!(transaction_id = tx.id, "Release skipped, status already moved");
                }
                Err(e) => {
                    warn!(transaction_id = tx.id, error = %e, "Auto-release failed");
                    report.errors += 1;
                }
            }
        }
    }

    async fn expire_unpaid(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let expired = match self.store.list_payment_expired(now, self.batch_size).await {
            Ok(expired) => expired,
            Err(e) => {
                error!(error = %e, "Failed to list unpaid transactions");
                report.errors += 1;
                return;
            }
        };

        for tx in expired {
            // A late confirmation may still be sitting at the gateway
            if tx.status == TransactionStatus::AwaitingPayment {
                match self.transactions.reconcile_payment(&tx, now).await {
                    Ok(true) => {
                        report.reconciled += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(transaction_id = tx.id, error = %e, "Could not reconcile before expiry");
                        report.errors += 1;
                        continue;
                    }
                }
            }

            match self.transactions.expire_unpaid(&tx, now).await {
                Ok(_) => report.expired += 1,
                Err(ServiceError::InvalidState(_)) | Err(ServiceError::AlreadyCompleted(_)) => {
                    debug!(transaction_id = tx.id, "Expiry skipped, status already moved");
                }
                Err(e) => {
                    warn!(transaction_id = tx.id, error = %e, "Payment deadline expiry failed");
                    report.errors += 1;
                }
            }
        }
    }

    async fn reconcile_pending(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let pending = match self
            .store
            .list_by_status(TransactionStatus::AwaitingPayment, self.batch_size)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to list transactions awaiting payment");
                report.errors += 1;
                return;
            }
        };

        for tx in pending {
            match self.transactions.reconcile_payment(&tx, now).await {
                Ok(true) => report.reconciled += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!(transaction_id = tx.id, error = %e, "Reconciliation deferred");
                }
            }
        }
    }

    async fn retry_payouts(&self, report: &mut SweepReport) {
        let max_attempts = self.transactions.policy().payout_max_attempts;
        let failed = match self
            .store
            .list_failed_payouts(max_attempts, self.batch_size)
            .await
        {
            Ok(failed) => failed,
            Err(e) => {
                error!(error = %e, "Failed to list failed payouts");
                report.errors += 1;
                return;
            }
        };

        for payment in failed {
            match self.transactions.retry_payout(&payment).await {
                Ok(PayoutOutcome::Initiated(_)) => report.payouts_retried += 1,
                Ok(PayoutOutcome::Failed(p)) if p.attempts >= max_attempts => {
                    error!(
                        transaction_id = p.transaction_id,
                        payment_id = p.id,
                        attempts = p.attempts,
                        "Payout retries exhausted, manual handling required"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(payment_id = payment.id, error = %e, "Payout retry failed");
                    report.errors += 1;
                }
            }
        }
    }
}

/// Background task that sweeps at a fixed interval until the process exits
pub async fn escrow_sweeper(sweeper: Arc<EscrowSweeper>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Starting escrow sweeper");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = sweeper.sweep_once(Utc::now()).await;
        if report.is_empty() {
            debug!("Escrow sweep found nothing to do");
        } else {
            info!(
                released = report.released,
                expired = report.expired,
                reconciled = report.reconciled,
                payouts_retried = report.payouts_retried,
                errors = report.errors,
                "Escrow sweep finished"
            );
        }
    }
}
