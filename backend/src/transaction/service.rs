//! Transaction service - escrow lifecycle commands
//!
//! Every state change goes through `Store::transition`, a compare-and-set on the
//! current status, after its expected statuses are checked against the
//! lifecycle graph. Side effects (payout, notifications, events) run only in the
//! call that won the compare-and-set.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::lifecycle::{
    compute_fees, generate_transaction_code, illegal_source, CANCELLABLE, TRANSFERABLE,
};
use super::model::*;
use crate::config::EscrowPolicy;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::{with_timeout, ChargeRequest, PaymentGateway, PayoutRequest};
use crate::models::{ListingStatus, PaginationParams};
use crate::notifications::{NotificationKind, Notifier};
use crate::store::{Store, StoreError};
use crate::websocket::WsState;

const MAX_CODE_ATTEMPTS: u32 = 5;
const TRANSACTION_CODE_CONSTRAINT: &str = "transactions_code_key";

/// Statuses from which an administrator may refund the buyer
pub const REFUNDABLE: [TransactionStatus; 4] = [
    TransactionStatus::PaymentConfirmed,
    TransactionStatus::EscrowHeld,
    TransactionStatus::TransferPending,
    TransactionStatus::DisputeResolved,
];

/// Result of a payout attempt. Completion never depends on it.
#[derive(Debug, Clone)]
pub enum PayoutOutcome {
    /// The gateway accepted the payout
    Initiated(Payment),
    /// The gateway call failed; the record is left for the retry sweep
    Failed(Payment),
    /// A payout was already claimed for this transaction
    AlreadyExists(Payment),
}

/// Escrow lifecycle service
pub struct TransactionService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    gateway_timeout: StdDuration,
    policy: EscrowPolicy,
    notifier: Notifier,
    ws_state: WsState,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        gateway_timeout: StdDuration,
        policy: EscrowPolicy,
        notifier: Notifier,
        ws_state: WsState,
    ) -> Self {
        Self {
            store,
            gateway,
            gateway_timeout,
            policy,
            notifier,
            ws_state,
        }
    }

    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }

    async fn load(&self, id: i64) -> ServiceResult<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))
    }

    /// Compare-and-set restricted to the lifecycle graph. An `expected` status
    /// without an edge to `to` is rejected before the store is touched.
    async fn transition(
        &self,
        id: i64,
        expected: &[TransactionStatus],
        to: TransactionStatus,
        patch: TransitionPatch,
    ) -> ServiceResult<Option<Transaction>> {
        if let Some(from) = illegal_source(expected, to) {
            error!(
                transaction_id = id,
                from = %from,
                to = %to,
                "Refusing transition outside the lifecycle graph"
            );
            return Err(ServiceError::InvalidState(format!(
                "Transaction {} cannot move from {} to {}",
                id, from, to
            )));
        }
        Ok(self.store.transition(id, expected, to, patch).await?)
    }

    /// Report a lost compare-and-set using the status that won
    async fn lost_race(&self, id: i64, attempted: TransactionStatus) -> ServiceError {
        match self.store.get_transaction(id).await {
            Ok(Some(tx)) => {
                debug!(
                    transaction_id = id,
                    current = %tx.status,
                    attempted = %attempted,
                    "Lost status compare-and-set"
                );
                if tx.status == TransactionStatus::Completed {
                    ServiceError::AlreadyCompleted(id)
                } else {
                    ServiceError::InvalidState(format!(
                        "Transaction {} is {}, cannot move to {}",
                        id, tx.status, attempted
                    ))
                }
            }
            Ok(None) => ServiceError::NotFound(format!("Transaction {} not found", id)),
            Err(e) => e.into(),
        }
    }

    fn notify_parties(&self, tx: &Transaction, buyer_kind: NotificationKind, seller_kind: NotificationKind) {
        let context = json!({ "transaction_id": tx.id, "code": tx.code, "status": tx.status });
        self.notifier.notify(tx.buyer_id, buyer_kind, context.clone());
        self.notifier.notify(tx.seller_id, seller_kind, context);
    }

    /// Create a transaction from an accepted offer
    pub async fn create_transaction(
        &self,
        buyer_id: Uuid,
        request: CreateTransactionRequest,
        buyer_ip: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        request.validate()?;

        let listing = self
            .store
            .get_listing(request.listing_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Listing {} not found", request.listing_id)))?;

        if listing.seller_id == buyer_id {
            return Err(ServiceError::Forbidden(
                "Sellers cannot buy their own listing".to_string(),
            ));
        }
        if listing.status != ListingStatus::Active {
            return Err(ServiceError::InvalidState(format!(
                "Listing {} is not available",
                listing.id
            )));
        }

        let rate_bps = self.policy.platform_fee_rate_bps;
        let (platform_fee, seller_net_amount) = compute_fees(request.agreed_price, rate_bps);

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let new = NewTransaction {
                code: generate_transaction_code(),
                listing_id: listing.id,
                buyer_id,
                seller_id: listing.seller_id,
                agreed_price: request.agreed_price,
                platform_fee,
                platform_fee_rate_bps: rate_bps,
                seller_net_amount,
                payment_deadline: now + Duration::hours(self.policy.payment_deadline_hours),
                buyer_ip: buyer_ip.clone(),
                seller_ip: listing.seller_ip.clone(),
                first_viewed_at: request.first_viewed_at,
                created_at: now,
            };

            match self.store.insert_transaction(new).await {
                Ok(tx) => {
                    info!(
                        transaction_id = tx.id,
                        code = %tx.code,
                        listing_id = tx.listing_id,
                        agreed_price = tx.agreed_price,
                        "Transaction created"
                    );
                    self.ws_state.broadcast_event(TransactionEvent::Created {
                        transaction_id: tx.id,
                        buyer_id: tx.buyer_id,
                        seller_id: tx.seller_id,
                    });
                    return Ok(tx);
                }
                Err(StoreError::UniqueViolation(constraint))
                    if constraint == TRANSACTION_CODE_CONSTRAINT =>
                {
                    debug!(attempt, "Transaction code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Conflict(format!(
            "Could not allocate a transaction code after {} attempts",
            MAX_CODE_ATTEMPTS
        )))
    }

    /// Fetch a transaction visible to the caller
    pub async fn get_transaction(
        &self,
        id: i64,
        user_id: Uuid,
        is_staff: bool,
    ) -> ServiceResult<Transaction> {
        let tx = self.load(id).await?;
        if !is_staff && !tx.is_party(user_id) {
            return Err(ServiceError::Forbidden(
                "Not a party to this transaction".to_string(),
            ));
        }
        Ok(tx)
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        query: ListTransactionsQuery,
    ) -> ServiceResult<Vec<Transaction>> {
        let (limit, offset) = PaginationParams {
            page: query.page,
            limit: query.limit,
        }
        .limit_offset();

        Ok(self
            .store
            .list_transactions_for_user(user_id, query.status, limit, offset)
            .await?)
    }

    /// Open the charge with the gateway and wait for payment
    pub async fn create_payment(
        &self,
        id: i64,
        payer_id: Uuid,
        method: PaymentMethod,
    ) -> ServiceResult<CreatePaymentResponse> {
        let tx = self.load(id).await?;

        if tx.buyer_id != payer_id {
            return Err(ServiceError::Forbidden(
                "Only the buyer can pay for this transaction".to_string(),
            ));
        }
        if tx.status != TransactionStatus::Initiated {
            return Err(ServiceError::InvalidState(format!(
                "Payment can only be created for INITIATED transactions (current: {})",
                tx.status
            )));
        }
        if self
            .store
            .find_active_payment(id, PaymentDirection::Charge)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "Transaction {} already has a payment",
                id
            )));
        }

        let payer_tax_id = if method.requires_tax_id() {
            let tax_id = self
                .store
                .get_profile(payer_id)
                .await?
                .and_then(|p| p.tax_id)
                .filter(|t| !t.trim().is_empty());
            match tax_id {
                Some(t) => Some(t),
                None => {
                    return Err(ServiceError::MissingIdentity(
                        "A tax id is required for this payment method".to_string(),
                    ))
                }
            }
        } else {
            None
        };

        // Nothing is persisted before the gateway answers, so a timeout here is safe to retry
        let charge = with_timeout(
            self.gateway_timeout,
            self.gateway.create_charge(ChargeRequest {
                reference: tx.code.clone(),
                payer_id,
                payer_tax_id,
                amount: tx.agreed_price,
                method,
            }),
        )
        .await
        .map_err(|e| {
            warn!(transaction_id = id, error = %e, "Charge creation failed");
            ServiceError::from(e)
        })?;

        let payment = self
            .store
            .insert_payment(NewPayment {
                transaction_id: id,
                direction: PaymentDirection::Charge,
                payer_id: Some(payer_id),
                payee_id: None,
                gateway_id: Some(charge.gateway_id.clone()),
                gross_amount: tx.agreed_price,
                net_amount: tx.seller_net_amount,
                method,
                status: PaymentStatus::Pending,
                last_error: None,
            })
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => {
                    ServiceError::Conflict(format!("Transaction {} already has a payment", id))
                }
                other => other.into(),
            })?;

        let updated = match self
            .transition(
                id,
                &[TransactionStatus::Initiated],
                TransactionStatus::AwaitingPayment,
                TransitionPatch::default(),
            )
            .await?
        {
            Some(updated) => updated,
            None => {
                // The gateway reference stays recorded so a late confirmation can be reconciled
                if let Err(e) = self
                    .store
                    .update_payment(
                        payment.id,
                        PaymentUpdate {
                            status: PaymentStatus::Failed,
                            gateway_id: None,
                            last_error: Some("transaction left INITIATED".to_string()),
                            increment_attempts: false,
                        },
                    )
                    .await
                {
                    warn!(
                        transaction_id = id,
                        payment_id = payment.id,
                        error = %e,
                        "Failed to mark orphaned charge failed"
                    );
                }
                return Err(self.lost_race(id, TransactionStatus::AwaitingPayment).await);
            }
        };

        info!(
            transaction_id = id,
            from = %TransactionStatus::Initiated,
            to = %updated.status,
            gateway_id = %charge.gateway_id,
            "Payment created"
        );
        self.ws_state
            .broadcast_event(TransactionEvent::PaymentCreated { transaction_id: id });

        Ok(CreatePaymentResponse {
            payment_id: payment.id,
            gateway_id: charge.gateway_id,
            status: updated.status,
            instructions: charge.instructions,
        })
    }

    /// Apply a status report pushed by the gateway
    pub async fn apply_webhook(
        &self,
        payload: PaymentWebhookPayload,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let payment = self
            .store
            .get_payment_by_gateway_id(&payload.gateway_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment {} not found", payload.gateway_id))
            })?;

        match payment.direction {
            PaymentDirection::Charge => {
                self.apply_charge_status(
                    &payment,
                    payload.status,
                    payload.funds_held.unwrap_or(true),
                    now,
                )
                .await
            }
            PaymentDirection::Payout => self.apply_payout_status(&payment, payload.status).await,
        }
    }

    async fn apply_charge_status(
        &self,
        payment: &Payment,
        status: GatewayPaymentStatus,
        funds_held: bool,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        match status {
            GatewayPaymentStatus::Paid => {
                self.confirm_payment(payment, funds_held, now).await?;
            }
            GatewayPaymentStatus::Failed => {
                self.record_failed_attempt(payment).await?;
            }
            GatewayPaymentStatus::Refunded => {
                self.refund_internal(payment.transaction_id, now, "refunded by gateway")
                    .await?;
            }
            GatewayPaymentStatus::Pending => {
                debug!(payment_id = payment.id, "Charge still pending");
            }
        }
        Ok(())
    }

    async fn apply_payout_status(
        &self,
        payment: &Payment,
        status: GatewayPaymentStatus,
    ) -> ServiceResult<()> {
        let (next, last_error) = match status {
            GatewayPaymentStatus::Paid => (PaymentStatus::Paid, None),
            GatewayPaymentStatus::Failed => {
                (PaymentStatus::Failed, Some("payout failed at gateway".to_string()))
            }
            GatewayPaymentStatus::Pending | GatewayPaymentStatus::Refunded => {
                debug!(payment_id = payment.id, ?status, "Ignoring payout status");
                return Ok(());
            }
        };
        if next == PaymentStatus::Failed {
            warn!(
                transaction_id = payment.transaction_id,
                payment_id = payment.id,
                "Payout reported failed, queued for retry"
            );
        }
        self.store
            .update_payment(
                payment.id,
                PaymentUpdate {
                    status: next,
                    gateway_id: None,
                    last_error,
                    increment_attempts: false,
                },
            )
            .await?;
        Ok(())
    }

    /// AWAITING_PAYMENT -> PAYMENT_CONFIRMED, or straight to ESCROW_HELD when
    /// the gateway already holds the funds. Duplicate confirmations are no-ops.
    pub async fn confirm_payment(
        &self,
        payment: &Payment,
        funds_held: bool,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        let id = payment.transaction_id;
        let tx = self.load(id).await?;

        let (expected, patch) = match tx.status {
            TransactionStatus::AwaitingPayment => (
                TransactionStatus::AwaitingPayment,
                TransitionPatch {
                    payment_confirmed_at: Some(now),
                    ..Default::default()
                },
            ),
            TransactionStatus::PaymentConfirmed if funds_held => {
                (TransactionStatus::PaymentConfirmed, TransitionPatch::default())
            }
            TransactionStatus::PaymentConfirmed
            | TransactionStatus::EscrowHeld
            | TransactionStatus::TransferPending
            | TransactionStatus::Completed
            | TransactionStatus::DisputeOpened
            | TransactionStatus::DisputeResolved => {
                debug!(transaction_id = id, status = %tx.status, "Duplicate payment confirmation");
                return Ok(tx);
            }
            other => {
                return Err(ServiceError::InvalidState(format!(
                    "Cannot confirm payment for a {} transaction",
                    other
                )))
            }
        };

        let target = if funds_held {
            TransactionStatus::EscrowHeld
        } else {
            TransactionStatus::PaymentConfirmed
        };

        let Some(updated) = self.transition(id, &[expected], target, patch).await? else {
            return Err(self.lost_race(id, target).await);
        };

        // The transition is committed; a stale charge row must not fail the caller
        if let Err(e) = self
            .store
            .update_payment(
                payment.id,
                PaymentUpdate {
                    status: PaymentStatus::Paid,
                    gateway_id: None,
                    last_error: None,
                    increment_attempts: false,
                },
            )
            .await
        {
            warn!(
                transaction_id = id,
                payment_id = payment.id,
                error = %e,
                "Failed to mark charge paid"
            );
        }

        info!(transaction_id = id, from = %expected, to = %target, "Payment confirmed");

        if expected == TransactionStatus::AwaitingPayment {
            self.notify_parties(
                &updated,
                NotificationKind::PaymentConfirmed,
                NotificationKind::PaymentConfirmed,
            );
            self.ws_state
                .broadcast_event(TransactionEvent::PaymentConfirmed { transaction_id: id });
        } else {
            self.ws_state.broadcast_event(TransactionEvent::StatusUpdated {
                transaction_id: id,
                status: target,
            });
        }

        Ok(updated)
    }

    /// A declined charge attempt; the charge stays open for another try
    async fn record_failed_attempt(&self, payment: &Payment) -> ServiceResult<()> {
        self.store
            .update_payment(
                payment.id,
                PaymentUpdate {
                    status: PaymentStatus::Pending,
                    gateway_id: None,
                    last_error: Some("charge attempt declined".to_string()),
                    increment_attempts: true,
                },
            )
            .await?;

        if let Some(tx) = self
            .store
            .increment_failed_payment_attempts(payment.transaction_id)
            .await?
        {
            info!(
                transaction_id = tx.id,
                failed_payment_attempts = tx.failed_payment_attempts,
                "Charge attempt failed"
            );
        }
        Ok(())
    }

    /// Poll the gateway for an unconfirmed charge. Returns true when the
    /// transaction moved.
    pub async fn reconcile_payment(&self, tx: &Transaction, now: DateTime<Utc>) -> ServiceResult<bool> {
        let Some(payment) = self
            .store
            .find_active_payment(tx.id, PaymentDirection::Charge)
            .await?
        else {
            return Ok(false);
        };
        let Some(gateway_id) = payment.gateway_id.as_deref() else {
            return Ok(false);
        };

        let status = with_timeout(self.gateway_timeout, self.gateway.get_status(gateway_id)).await?;
        match status {
            GatewayPaymentStatus::Paid => {
                self.confirm_payment(&payment, true, now).await?;
                Ok(true)
            }
            GatewayPaymentStatus::Pending => Ok(false),
            other => {
                debug!(transaction_id = tx.id, ?other, "Charge not payable, leaving for deadline sweep");
                Ok(false)
            }
        }
    }

    /// Seller marks the reservation as handed over and starts the release clock
    pub async fn mark_transferred(
        &self,
        id: i64,
        seller_id: Uuid,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        let tx = self.load(id).await?;

        if tx.seller_id != seller_id {
            return Err(ServiceError::Forbidden(
                "Only the seller can mark the transfer".to_string(),
            ));
        }
        if !TRANSFERABLE.contains(&tx.status) {
            return Err(ServiceError::InvalidState(format!(
                "Cannot mark transfer while {}",
                tx.status
            )));
        }

        let release = now + Duration::days(self.policy.escrow_timeout_days);
        let patch = TransitionPatch {
            transferred_at: Some(now),
            escrow_release_date: Some(release),
            ..Default::default()
        };

        let Some(updated) = self
            .transition(id, &TRANSFERABLE, TransactionStatus::TransferPending, patch)
            .await?
        else {
            return Err(self.lost_race(id, TransactionStatus::TransferPending).await);
        };

        info!(
            transaction_id = id,
            from = %tx.status,
            to = %updated.status,
            escrow_release_date = %release,
            "Transfer marked"
        );
        self.notifier.notify(
            updated.buyer_id,
            NotificationKind::TransferMarked,
            json!({ "transaction_id": id, "code": updated.code, "escrow_release_date": release }),
        );
        self.ws_state.broadcast_event(TransactionEvent::Transferred {
            transaction_id: id,
            escrow_release_date: release,
        });

        Ok(updated)
    }

    /// Complete the transaction, by hand or after the release deadline.
    /// Only the caller that wins the status compare-and-set runs side effects.
    pub async fn confirm_receipt(
        &self,
        id: i64,
        actor: ReceiptActor,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        let tx = self.load(id).await?;

        if let ReceiptActor::Buyer(user_id) = actor {
            if tx.buyer_id != user_id {
                return Err(ServiceError::Forbidden(
                    "Only the buyer can confirm receipt".to_string(),
                ));
            }
        }
        if tx.status == TransactionStatus::Completed {
            return Err(ServiceError::AlreadyCompleted(id));
        }
        if tx.status != TransactionStatus::TransferPending {
            return Err(ServiceError::InvalidState(format!(
                "Cannot confirm receipt while {}",
                tx.status
            )));
        }

        let patch = match actor {
            ReceiptActor::Buyer(_) => TransitionPatch {
                buyer_confirmed_at: Some(now),
                completed_at: Some(now),
                ..Default::default()
            },
            ReceiptActor::System => {
                let release = tx.escrow_release_date.ok_or_else(|| {
                    ServiceError::InvalidState(format!("Transaction {} has no release date", id))
                })?;
                if now < release {
                    return Err(ServiceError::TooEarly(format!(
                        "Escrow for transaction {} releases at {}",
                        id, release
                    )));
                }
                TransitionPatch {
                    auto_release: Some(true),
                    completed_at: Some(now),
                    ..Default::default()
                }
            }
        };

        let Some(completed) = self
            .transition(
                id,
                &[TransactionStatus::TransferPending],
                TransactionStatus::Completed,
                patch,
            )
            .await?
        else {
            return Err(self.lost_race(id, TransactionStatus::Completed).await);
        };

        info!(
            transaction_id = id,
            from = %TransactionStatus::TransferPending,
            to = %TransactionStatus::Completed,
            auto_release = completed.auto_release,
            "Transaction completed"
        );

        self.on_completed(&completed).await;
        Ok(completed)
    }

    async fn on_completed(&self, tx: &Transaction) {
        match self.store.mark_listing_sold(tx.listing_id).await {
            Ok(true) => {}
            Ok(false) => warn!(listing_id = tx.listing_id, "Listing to mark sold not found"),
            Err(e) => warn!(listing_id = tx.listing_id, error = %e, "Failed to mark listing sold"),
        }

        if let Err(e) = self.initiate_payout(tx).await {
            warn!(transaction_id = tx.id, error = %e, "Payout initiation failed");
        }

        self.notify_parties(
            tx,
            NotificationKind::TransactionCompleted,
            NotificationKind::FundsIncoming,
        );
        self.ws_state.broadcast_event(TransactionEvent::Completed {
            transaction_id: tx.id,
            auto_release: tx.auto_release,
        });
    }

    /// Claim the single payout row, then ask the gateway to pay the seller
    pub async fn initiate_payout(&self, tx: &Transaction) -> ServiceResult<PayoutOutcome> {
        let claim = self
            .store
            .insert_payment(NewPayment {
                transaction_id: tx.id,
                direction: PaymentDirection::Payout,
                payer_id: None,
                payee_id: Some(tx.seller_id),
                gateway_id: None,
                gross_amount: tx.agreed_price,
                net_amount: tx.seller_net_amount,
                method: PaymentMethod::BankTransfer,
                status: PaymentStatus::Pending,
                last_error: None,
            })
            .await;

        let payment = match claim {
            Ok(payment) => payment,
            Err(StoreError::UniqueViolation(_)) => {
                let existing = self.store.get_payout(tx.id).await?.ok_or_else(|| {
                    ServiceError::Store(format!("Payout for transaction {} vanished", tx.id))
                })?;
                debug!(transaction_id = tx.id, "Payout already claimed");
                return Ok(PayoutOutcome::AlreadyExists(existing));
            }
            Err(e) => return Err(e.into()),
        };

        self.send_payout(tx, payment, false).await
    }

    /// Retry a failed payout; used by the escrow sweep
    pub async fn retry_payout(&self, payment: &Payment) -> ServiceResult<PayoutOutcome> {
        if payment.direction != PaymentDirection::Payout || payment.status != PaymentStatus::Failed {
            return Err(ServiceError::InvalidState(format!(
                "Payment {} is not a failed payout",
                payment.id
            )));
        }
        let tx = self.load(payment.transaction_id).await?;
        self.send_payout(&tx, payment.clone(), true).await
    }

    async fn send_payout(
        &self,
        tx: &Transaction,
        payment: Payment,
        is_retry: bool,
    ) -> ServiceResult<PayoutOutcome> {
        let result = with_timeout(
            self.gateway_timeout,
            self.gateway.create_payout(PayoutRequest {
                reference: tx.code.clone(),
                payee_id: tx.seller_id,
                amount: tx.seller_net_amount,
            }),
        )
        .await;

        let (update, succeeded) = match result {
            Ok(response) => (
                PaymentUpdate {
                    status: PaymentStatus::Processing,
                    gateway_id: Some(response.gateway_id),
                    last_error: None,
                    increment_attempts: is_retry,
                },
                true,
            ),
            Err(e) => {
                warn!(
                    transaction_id = tx.id,
                    payment_id = payment.id,
                    attempts = payment.attempts,
                    error = %e,
                    "Payout failed, queued for retry"
                );
                (
                    PaymentUpdate {
                        status: PaymentStatus::Failed,
                        gateway_id: None,
                        last_error: Some(e.to_string()),
                        increment_attempts: is_retry,
                    },
                    false,
                )
            }
        };

        let updated = self
            .store
            .update_payment(payment.id, update)
            .await?
            .unwrap_or(payment);

        if succeeded {
            info!(
                transaction_id = tx.id,
                payment_id = updated.id,
                amount = updated.net_amount,
                "Payout initiated"
            );
            Ok(PayoutOutcome::Initiated(updated))
        } else {
            Ok(PayoutOutcome::Failed(updated))
        }
    }

    /// Either party cancels a transaction that is not terminal or disputed
    pub async fn cancel(
        &self,
        id: i64,
        user_id: Uuid,
        request: CancelTransactionRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        request.validate()?;
        let tx = self.load(id).await?;

        if !tx.is_party(user_id) {
            return Err(ServiceError::Forbidden(
                "Not a party to this transaction".to_string(),
            ));
        }
        if !CANCELLABLE.contains(&tx.status) {
            return Err(ServiceError::InvalidState(format!(
                "Cannot cancel while {}",
                tx.status
            )));
        }

        let cancelled = self
            .cancel_internal(id, &CANCELLABLE, request.reason, now)
            .await?;

        let other = if cancelled.buyer_id == user_id {
            cancelled.seller_id
        } else {
            cancelled.buyer_id
        };
        self.notifier.notify(
            other,
            NotificationKind::TransactionCancelled,
            json!({ "transaction_id": id, "code": cancelled.code, "reason": cancelled.cancel_reason }),
        );
        Ok(cancelled)
    }

    async fn cancel_internal(
        &self,
        id: i64,
        expected: &[TransactionStatus],
        reason: String,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        let patch = TransitionPatch {
            cancelled_at: Some(now),
            cancel_reason: Some(reason.clone()),
            ..Default::default()
        };
        let Some(cancelled) = self
            .transition(id, expected, TransactionStatus::Cancelled, patch)
            .await?
        else {
            return Err(self.lost_race(id, TransactionStatus::Cancelled).await);
        };

        info!(transaction_id = id, to = %TransactionStatus::Cancelled, reason = %reason, "Transaction cancelled");
        self.ws_state.broadcast_event(TransactionEvent::Cancelled {
            transaction_id: id,
            reason,
        });
        Ok(cancelled)
    }

    /// Cancel an unpaid transaction whose payment deadline has passed
    pub async fn expire_unpaid(&self, tx: &Transaction, now: DateTime<Utc>) -> ServiceResult<Transaction> {
        if tx.payment_deadline >= now {
            return Err(ServiceError::TooEarly(format!(
                "Payment deadline of transaction {} is {}",
                tx.id, tx.payment_deadline
            )));
        }
        let cancelled = self
            .cancel_internal(
                tx.id,
                &[TransactionStatus::Initiated, TransactionStatus::AwaitingPayment],
                "payment_deadline_expired".to_string(),
                now,
            )
            .await?;
        self.notify_parties(
            &cancelled,
            NotificationKind::PaymentDeadlineExpired,
            NotificationKind::PaymentDeadlineExpired,
        );
        Ok(cancelled)
    }

    /// Administrative refund of a funded transaction
    pub async fn refund(&self, id: i64, admin_id: Uuid, now: DateTime<Utc>) -> ServiceResult<Transaction> {
        let tx = self.load(id).await?;
        if !REFUNDABLE.contains(&tx.status) {
            return Err(ServiceError::InvalidState(format!(
                "Cannot refund while {}",
                tx.status
            )));
        }
        info!(transaction_id = id, admin_id = %admin_id, "Refund requested");
        self.refund_internal(id, now, "refunded by administrator").await
    }

    async fn refund_internal(&self, id: i64, now: DateTime<Utc>, note: &str) -> ServiceResult<Transaction> {
        let patch = TransitionPatch {
            refunded_at: Some(now),
            ..Default::default()
        };
        let Some(refunded) = self
            .transition(id, &REFUNDABLE, TransactionStatus::Refunded, patch)
            .await?
        else {
            return Err(self.lost_race(id, TransactionStatus::Refunded).await);
        };

        info!(transaction_id = id, to = %TransactionStatus::Refunded, note, "Transaction refunded");
        self.notify_parties(
            &refunded,
            NotificationKind::TransactionRefunded,
            NotificationKind::TransactionRefunded,
        );
        self.ws_state
            .broadcast_event(TransactionEvent::Refunded { transaction_id: id });
        Ok(refunded)
    }

    /// Administrative decision once every dispute on the transaction is resolved
    pub async fn settle(
        &self,
        id: i64,
        admin_id: Uuid,
        request: SettleTransactionRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Transaction> {
        let tx = self.load(id).await?;
        if tx.status != TransactionStatus::DisputeResolved {
            return Err(ServiceError::InvalidState(format!(
                "Only DISPUTE_RESOLVED transactions can be settled (current: {})",
                tx.status
            )));
        }

        info!(transaction_id = id, admin_id = %admin_id, outcome = ?request.outcome, "Settling transaction");

        match request.outcome {
            SettlementOutcome::ResumeTransfer => {
                let release = now + Duration::days(self.policy.escrow_timeout_days);
                let patch = TransitionPatch {
                    escrow_release_date: Some(release),
                    ..Default::default()
                };
                let Some(updated) = self
                    .transition(
                        id,
                        &[TransactionStatus::DisputeResolved],
                        TransactionStatus::TransferPending,
                        patch,
                    )
                    .await?
                else {
                    return Err(self.lost_race(id, TransactionStatus::TransferPending).await);
                };
                info!(
                    transaction_id = id,
                    from = %TransactionStatus::DisputeResolved,
                    to = %TransactionStatus::TransferPending,
                    escrow_release_date = %release,
                    "Transfer window reopened"
                );
                self.ws_state.broadcast_event(TransactionEvent::Transferred {
                    transaction_id: id,
                    escrow_release_date: release,
                });
                Ok(updated)
            }
            SettlementOutcome::Refund => self.refund_internal(id, now, "refunded after dispute").await,
            SettlementOutcome::Cancel => {
                let reason = request
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "cancelled after dispute".to_string());
                let cancelled = self
                    .cancel_internal(id, &[TransactionStatus::DisputeResolved], reason, now)
                    .await?;
                self.notify_parties(
                    &cancelled,
                    NotificationKind::TransactionCancelled,
                    NotificationKind::TransactionCancelled,
                );
                Ok(cancelled)
            }
        }
    }

    pub async fn list_payments(&self, id: i64) -> ServiceResult<Vec<Payment>> {
        Ok(self.store.list_payments_for_transaction(id).await?)
    }
}
