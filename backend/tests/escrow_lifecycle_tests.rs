//! Escrow lifecycle tests against the in-memory store

mod common;

use chrono::Duration;

use common::{t0, Harness};
use passvault_server::dispute::{
    DisputeReason, DisputeResolution, DisputeService, OpenDisputeRequest, ResolveDisputeRequest,
};
use passvault_server::error::ServiceError;
use passvault_server::escrow::EscrowSweeper;
use passvault_server::notifications::NotificationKind;
use passvault_server::transaction::{
    CancelTransactionRequest, GatewayPaymentStatus, PaymentDirection, PaymentMethod,
    PaymentStatus, PaymentWebhookPayload, ReceiptActor, SettleTransactionRequest,
    SettlementOutcome, TransactionStatus,
};

fn release_at(h: &Harness) -> chrono::DateTime<chrono::Utc> {
    let days = h.transactions.policy().escrow_timeout_days;
    t0() + Duration::hours(1) + Duration::days(days)
}

#[tokio::test]
async fn test_fee_split_on_creation() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;

    assert_eq!(tx.status, TransactionStatus::Initiated);
    assert_eq!(tx.platform_fee, 50);
    assert_eq!(tx.seller_net_amount, 950);
    assert_eq!(tx.platform_fee + tx.seller_net_amount, tx.agreed_price);
    assert_eq!(tx.seller_id, h.seller);
    assert_eq!(tx.payment_deadline, t0() + Duration::hours(24));
}

#[tokio::test]
async fn test_seller_cannot_buy_own_listing() {
    let h = Harness::new().await;
    let result = h
        .transactions
        .create_transaction(
            h.seller,
            passvault_server::transaction::CreateTransactionRequest {
                listing_id: common::LISTING_ID,
                agreed_price: 1_000,
                first_viewed_at: None,
            },
            None,
            t0(),
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn test_payment_webhook_moves_to_escrow_held() {
    let h = Harness::new().await;
    let tx = h.held(1_000).await;

    assert_eq!(tx.status, TransactionStatus::EscrowHeld);
    assert!(tx.payment_confirmed_at.is_some());
    assert!(h.sink.wait_for(h.seller, NotificationKind::PaymentConfirmed).await);

    let payments = h.transactions.list_payments(tx.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_second_payment_rejected() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    h.transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await
        .unwrap();

    // The transaction already left INITIATED
    let again = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await;
    assert!(matches!(again, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn test_pix_requires_tax_id() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    let result = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::Pix)
        .await;
    assert!(matches!(result, Err(ServiceError::MissingIdentity(_))));
    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::Initiated);
}

#[tokio::test]
async fn test_declined_charge_counts_attempt() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    let payment = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await
        .unwrap();

    h.transactions
        .apply_webhook(
            PaymentWebhookPayload {
                gateway_id: payment.gateway_id,
                status: GatewayPaymentStatus::Failed,
                funds_held: None,
                _timestamp: None,
            },
            t0(),
        )
        .await
        .unwrap();

    let tx = h.reload(tx.id).await;
    assert_eq!(tx.status, TransactionStatus::AwaitingPayment);
    assert_eq!(tx.failed_payment_attempts, 1);
}

#[tokio::test]
async fn test_charge_orphaned_by_concurrent_cancel() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    h.gateway.cancel_during_charge(h.memory.clone(), tx.id).await;

    let result = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::Cancelled);

    let payments = h.transactions.list_payments(tx.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert!(payments[0].gateway_id.is_some());
}

#[tokio::test]
async fn test_orphaned_charge_store_failure_keeps_lost_race_error() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    h.gateway.cancel_during_charge(h.memory.clone(), tx.id).await;
    h.memory.set_fail_payment_updates(true);

    let result = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));

    h.memory.set_fail_payment_updates(false);
    let payments = h.transactions.list_payments(tx.id).await.unwrap();
    assert_eq!(payments[0].status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_confirmation_survives_charge_row_failure() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    let payment = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await
        .unwrap();
    h.memory.set_fail_payment_updates(true);

    h.transactions
        .apply_webhook(
            PaymentWebhookPayload {
                gateway_id: payment.gateway_id,
                status: GatewayPaymentStatus::Paid,
                funds_held: Some(true),
                _timestamp: None,
            },
            t0() + Duration::minutes(5),
        )
        .await
        .unwrap();
    h.memory.set_fail_payment_updates(false);

    let tx = h.reload(tx.id).await;
    assert_eq!(tx.status, TransactionStatus::EscrowHeld);
    assert_eq!(tx.payment_confirmed_at, Some(t0() + Duration::minutes(5)));
    assert!(h.sink.wait_for(h.seller, NotificationKind::PaymentConfirmed).await);
}

#[tokio::test]
async fn test_mark_transferred_requires_funds() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    h.transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await
        .unwrap();

    let result = h
        .transactions
        .mark_transferred(tx.id, h.seller, t0() + Duration::hours(1))
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::AwaitingPayment);
}

#[tokio::test]
async fn test_only_seller_marks_transfer() {
    let h = Harness::new().await;
    let tx = h.held(1_000).await;
    let result = h
        .transactions
        .mark_transferred(tx.id, h.buyer, t0() + Duration::hours(1))
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn test_auto_release_waits_for_deadline() {
    let h = Harness::new().await;
    let tx = h.transferred(1_000).await;
    assert_eq!(tx.status, TransactionStatus::TransferPending);
    assert_eq!(tx.escrow_release_date, Some(release_at(&h)));

    let early = h
        .transactions
        .confirm_receipt(tx.id, ReceiptActor::System, t0() + Duration::hours(1) + Duration::days(6))
        .await;
    assert!(matches!(early, Err(ServiceError::TooEarly(_))));
    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::TransferPending);

    let done = h
        .transactions
        .confirm_receipt(tx.id, ReceiptActor::System, release_at(&h) + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
    assert!(done.auto_release);
    assert_eq!(h.gateway.payout_calls(), 1);
}

#[tokio::test]
async fn test_auto_release_at_exact_deadline() {
    let h = Harness::new().await;
    let tx = h.transferred(1_000).await;

    let done = h
        .transactions
        .confirm_receipt(tx.id, ReceiptActor::System, release_at(&h))
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
    assert!(done.auto_release);
    assert_eq!(done.completed_at, Some(release_at(&h)));
}

#[tokio::test]
async fn test_manual_then_automatic_release_pays_once() {
    let h = Harness::new().await;
    let tx = h.transferred(1_000).await;

    let done = h
        .transactions
        .confirm_receipt(tx.id, ReceiptActor::Buyer(h.buyer), t0() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
    assert!(!done.auto_release);
    assert!(done.buyer_confirmed_at.is_some());

    let again = h
        .transactions
        .confirm_receipt(tx.id, ReceiptActor::System, release_at(&h) + Duration::seconds(1))
        .await;
    assert!(matches!(again, Err(ServiceError::AlreadyCompleted(id)) if id == tx.id));

    assert_eq!(h.gateway.payout_calls(), 1);
    let payout = h.store.get_payout(tx.id).await.unwrap().unwrap();
    assert_eq!(payout.direction, PaymentDirection::Payout);
    assert_eq!(payout.net_amount, 950);
    assert_eq!(payout.status, PaymentStatus::Processing);

    assert!(h.sink.wait_for(h.buyer, NotificationKind::TransactionCompleted).await);
    assert!(h.sink.wait_for(h.seller, NotificationKind::FundsIncoming).await);
}

#[tokio::test]
async fn test_concurrent_confirmations_complete_once() {
    let h = Harness::new().await;
    let tx = h.transferred(1_000).await;
    let now = release_at(&h) + Duration::seconds(1);
    let id = tx.id;

    let manual = {
        let svc = h.transactions.clone();
        let buyer = h.buyer;
        tokio::spawn(async move { svc.confirm_receipt(id, ReceiptActor::Buyer(buyer), now).await })
    };
    let automatic = {
        let svc = h.transactions.clone();
        tokio::spawn(async move { svc.confirm_receipt(id, ReceiptActor::System, now).await })
    };

    let results = [manual.await.unwrap(), automatic.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ServiceError::AlreadyCompleted(_)))));

    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::Completed);
    assert_eq!(h.gateway.payout_calls(), 1);
}

#[tokio::test]
async fn test_cancel_before_payment() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;

    let cancelled = h
        .transactions
        .cancel(
            tx.id,
            h.seller,
            CancelTransactionRequest {
                reason: "sold elsewhere".to_string(),
            },
            t0() + Duration::minutes(10),
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("sold elsewhere"));

    let again = h
        .transactions
        .cancel(
            tx.id,
            h.buyer,
            CancelTransactionRequest {
                reason: "changed my mind".to_string(),
            },
            t0() + Duration::minutes(11),
        )
        .await;
    assert!(matches!(again, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn test_sweeper_releases_and_expires() {
    let h = Harness::new().await;
    let releasing = h.transferred(1_000).await;
    let unpaid = h.create(800).await;
    let sweeper = EscrowSweeper::new(h.store.clone(), h.transactions.clone());

    // Nothing is due yet
    let quiet = sweeper.sweep_once(t0() + Duration::hours(2)).await;
    assert!(quiet.is_empty());

    let report = sweeper
        .sweep_once(release_at(&h) + Duration::seconds(1))
        .await;
    assert_eq!(report.released, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(report.errors, 0);

    let released = h.reload(releasing.id).await;
    assert_eq!(released.status, TransactionStatus::Completed);
    assert!(released.auto_release);

    let expired = h.reload(unpaid.id).await;
    assert_eq!(expired.status, TransactionStatus::Cancelled);
    assert!(h.sink.wait_for(h.buyer, NotificationKind::PaymentDeadlineExpired).await);

    // A second pass finds nothing left to do
    let again = sweeper
        .sweep_once(release_at(&h) + Duration::minutes(1))
        .await;
    assert_eq!(again.released, 0);
    assert_eq!(h.gateway.payout_calls(), 1);
}

#[tokio::test]
async fn test_sweeper_reconciles_late_payment() {
    let h = Harness::new().await;
    let tx = h.create(1_000).await;
    h.transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await
        .unwrap();
    h.gateway.set_status(GatewayPaymentStatus::Paid).await;

    let sweeper = EscrowSweeper::new(h.store.clone(), h.transactions.clone());
    let report = sweeper.sweep_once(t0() + Duration::hours(25)).await;

    assert_eq!(report.reconciled, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(h.reload(tx.id).await.status, TransactionStatus::EscrowHeld);
}

#[tokio::test]
async fn test_sweeper_retries_failed_payout() {
    let h = Harness::new().await;
    let tx = h.transferred(1_000).await;
    h.gateway.set_fail_payouts(true);

    h.transactions
        .confirm_receipt(tx.id, ReceiptActor::Buyer(h.buyer), t0() + Duration::days(1))
        .await
        .unwrap();
    let payout = h.store.get_payout(tx.id).await.unwrap().unwrap();
    assert_eq!(payout.status, PaymentStatus::Failed);

    h.gateway.set_fail_payouts(false);
    let sweeper = EscrowSweeper::new(h.store.clone(), h.transactions.clone());
    let report = sweeper.sweep_once(t0() + Duration::days(1) + Duration::minutes(1)).await;
    assert_eq!(report.payouts_retried, 1);

    let payout = h.store.get_payout(tx.id).await.unwrap().unwrap();
    assert_eq!(payout.status, PaymentStatus::Processing);
    assert_eq!(payout.attempts, 2);
    assert_eq!(h.gateway.payout_calls(), 2);
}

/// Reload the transaction and check that any status change is a lifecycle edge
async fn observed_edge(h: &Harness, id: i64, before: TransactionStatus) -> TransactionStatus {
    let after = h.reload(id).await.status;
    if after != before {
        assert!(
            before.can_transition_to(after),
            "observed illegal move {} -> {}",
            before,
            after
        );
    }
    after
}

fn webhook(gateway_id: String, funds_held: bool) -> PaymentWebhookPayload {
    PaymentWebhookPayload {
        gateway_id,
        status: GatewayPaymentStatus::Paid,
        funds_held: Some(funds_held),
        _timestamp: None,
    }
}

fn dispute_request() -> OpenDisputeRequest {
    OpenDisputeRequest {
        reason: DisputeReason::NotTransferred,
        description: "Seller marked the transfer but nothing arrived".to_string(),
        evidence: Vec::new(),
    }
}

#[tokio::test]
async fn test_every_command_follows_lifecycle_edges() {
    let h = Harness::new().await;
    let disputes = DisputeService::new(h.store.clone(), h.notifier.clone(), h.ws_state.clone());
    let admin = uuid::Uuid::new_v4();
    let mut seen = Vec::new();

    // Dispute, resumed transfer, then refund
    let tx = h.held(900).await;
    let mut status = tx.status;
    let dispute = disputes
        .open_dispute(tx.id, h.buyer, dispute_request(), t0() + Duration::hours(2))
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    disputes
        .resolve_dispute(
            dispute.id,
            admin,
            ResolveDisputeRequest {
                resolution: DisputeResolution::ResolvedSeller,
                notes: None,
            },
            t0() + Duration::hours(3),
        )
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    h.transactions
        .settle(
            tx.id,
            admin,
            SettleTransactionRequest {
                outcome: SettlementOutcome::ResumeTransfer,
                reason: None,
            },
            t0() + Duration::hours(4),
        )
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    h.transactions
        .refund(tx.id, admin, t0() + Duration::hours(5))
        .await
        .unwrap();
    seen.push(observed_edge(&h, tx.id, status).await);

    // Dispute settled by cancellation
    let tx = h.held(800).await;
    let mut status = tx.status;
    let dispute = disputes
        .open_dispute(tx.id, h.seller, dispute_request(), t0() + Duration::hours(2))
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    disputes
        .resolve_dispute(
            dispute.id,
            admin,
            ResolveDisputeRequest {
                resolution: DisputeResolution::Closed,
                notes: None,
            },
            t0() + Duration::hours(3),
        )
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    h.transactions
        .settle(
            tx.id,
            admin,
            SettleTransactionRequest {
                outcome: SettlementOutcome::Cancel,
                reason: None,
            },
            t0() + Duration::hours(4),
        )
        .await
        .unwrap();
    seen.push(observed_edge(&h, tx.id, status).await);

    // Party cancellation and deadline expiry
    let cancelled = h.create(700).await;
    h.transactions
        .cancel(
            cancelled.id,
            h.buyer,
            CancelTransactionRequest {
                reason: "changed my mind".to_string(),
            },
            t0() + Duration::minutes(5),
        )
        .await
        .unwrap();
    seen.push(observed_edge(&h, cancelled.id, cancelled.status).await);

    let unpaid = h.create(600).await;
    EscrowSweeper::new(h.store.clone(), h.transactions.clone())
        .sweep_once(t0() + Duration::hours(25))
        .await;
    seen.push(observed_edge(&h, unpaid.id, unpaid.status).await);

    // Completion marks the listing sold, so the happy path runs last.
    // The escrow hold arrives as a separate report.
    let tx = h.create(1_000).await;
    let mut status = tx.status;
    let payment = h
        .transactions
        .create_payment(tx.id, h.buyer, PaymentMethod::CreditCard)
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    h.transactions
        .apply_webhook(webhook(payment.gateway_id.clone(), false), t0())
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    h.transactions
        .apply_webhook(webhook(payment.gateway_id, true), t0())
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    h.transactions
        .mark_transferred(tx.id, h.seller, t0() + Duration::hours(1))
        .await
        .unwrap();
    status = observed_edge(&h, tx.id, status).await;
    seen.push(status);
    h.transactions
        .confirm_receipt(tx.id, ReceiptActor::Buyer(h.buyer), t0() + Duration::days(1))
        .await
        .unwrap();
    seen.push(observed_edge(&h, tx.id, status).await);

    for expected in [
        TransactionStatus::AwaitingPayment,
        TransactionStatus::PaymentConfirmed,
        TransactionStatus::EscrowHeld,
        TransactionStatus::TransferPending,
        TransactionStatus::Completed,
        TransactionStatus::DisputeOpened,
        TransactionStatus::DisputeResolved,
        TransactionStatus::Refunded,
        TransactionStatus::Cancelled,
    ] {
        assert!(seen.contains(&expected), "never reached {}", expected);
    }
}
