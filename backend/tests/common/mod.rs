//! Shared fixtures for the service-level tests: in-memory store, a scripted
//! payment gateway and a notification sink that records deliveries.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use passvault_server::config::EscrowPolicy;
use passvault_server::gateway::{
    ChargeRequest, ChargeResponse, GatewayError, GatewayResult, PaymentGateway, PayoutRequest,
    PayoutResponse,
};
use passvault_server::models::{Listing, ListingStatus, UserProfile};
use passvault_server::notifications::{
    Notification, NotificationKind, NotificationSink, Notifier, NotifyError, RetryPolicy,
};
use passvault_server::store::{MemoryStore, Store, TransactionStore};
use passvault_server::transaction::{
    CreateTransactionRequest, GatewayPaymentStatus, PaymentInstructions, PaymentMethod,
    PaymentWebhookPayload, Transaction, TransactionService, TransactionStatus, TransitionPatch,
};
use passvault_server::websocket::WsState;

pub const LISTING_ID: i64 = 1;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

/// Gateway double: charges succeed, payouts are counted and can be made to fail
#[derive(Default)]
pub struct FakeGateway {
    charges: AtomicUsize,
    payouts: AtomicUsize,
    fail_payouts: std::sync::atomic::AtomicBool,
    status: Mutex<Option<GatewayPaymentStatus>>,
    interrupt: Mutex<Option<(Arc<MemoryStore>, i64)>>,
}

impl FakeGateway {
    pub fn payout_calls(&self) -> usize {
        self.payouts.load(Ordering::SeqCst)
    }

    pub fn set_fail_payouts(&self, fail: bool) {
        self.fail_payouts.store(fail, Ordering::SeqCst);
    }

    /// Cancel the transaction while the next charge is being opened
    pub async fn cancel_during_charge(&self, store: Arc<MemoryStore>, transaction_id: i64) {
        *self.interrupt.lock().await = Some((store, transaction_id));
    }

    /// Status reported by `get_status`; `Pending` when unset
    pub async fn set_status(&self, status: GatewayPaymentStatus) {
        *self.status.lock().await = Some(status);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse> {
        let n = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        let interrupt = self.interrupt.lock().await.take();
        if let Some((store, id)) = interrupt {
            store
                .transition(
                    id,
                    &[TransactionStatus::Initiated],
                    TransactionStatus::Cancelled,
                    TransitionPatch::default(),
                )
                .await
                .unwrap();
        }
        Ok(ChargeResponse {
            gateway_id: format!("ch_{}_{}", request.reference, n),
            instructions: PaymentInstructions::Redirect {
                url: format!("https://pay.example/{}", request.reference),
            },
        })
    }

    async fn create_payout(&self, request: PayoutRequest) -> GatewayResult<PayoutResponse> {
        let n = self.payouts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 502,
                message: "bank offline".to_string(),
            });
        }
        Ok(PayoutResponse {
            gateway_id: format!("po_{}_{}", request.reference, n),
        })
    }

    async fn get_status(&self, _gateway_id: &str) -> GatewayResult<GatewayPaymentStatus> {
        Ok(self
            .status
            .lock()
            .await
            .unwrap_or(GatewayPaymentStatus::Pending))
    }
}

/// Keeps every delivered notification
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}

impl RecordingSink {
    /// Wait for the worker to deliver `kind` to `user_id`
    pub async fn wait_for(&self, user_id: Uuid, kind: NotificationKind) -> bool {
        for _ in 0..100 {
            if self
                .delivered
                .lock()
                .await
                .iter()
                .any(|n| n.user_id == user_id && n.kind == kind)
            {
                return true;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        false
    }
}

pub struct Harness {
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn Store>,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<RecordingSink>,
    pub notifier: Notifier,
    pub ws_state: WsState,
    pub transactions: Arc<TransactionService>,
    pub buyer: Uuid,
    pub seller: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let gateway = Arc::new(FakeGateway::default());
        let sink = Arc::new(RecordingSink::default());
        let (notifier, _worker) = Notifier::spawn(
            sink.clone(),
            RetryPolicy {
                max_attempts: 1,
                initial_delay: StdDuration::from_millis(1),
                max_delay: StdDuration::from_millis(1),
            },
        );
        let ws_state = WsState::new();

        let transactions = Arc::new(TransactionService::new(
            store.clone(),
            gateway.clone(),
            StdDuration::from_secs(2),
            EscrowPolicy::default(),
            notifier.clone(),
            ws_state.clone(),
        ));

        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        memory.seed_listing(listing(LISTING_ID, seller)).await;

        Self {
            memory,
            store,
            gateway,
            sink,
            notifier,
            ws_state,
            transactions,
            buyer,
            seller,
        }
    }

    pub async fn create(&self, agreed_price: i64) -> Transaction {
        self.transactions
            .create_transaction(
                self.buyer,
                CreateTransactionRequest {
                    listing_id: LISTING_ID,
                    agreed_price,
                    first_viewed_at: None,
                },
                Some("203.0.113.10".to_string()),
                t0(),
            )
            .await
            .unwrap()
    }

    /// Create, pay and confirm with funds held
    pub async fn held(&self, agreed_price: i64) -> Transaction {
        let tx = self.create(agreed_price).await;
        let payment = self
            .transactions
            .create_payment(tx.id, self.buyer, PaymentMethod::CreditCard)
            .await
            .unwrap();
        self.transactions
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
        self.reload(tx.id).await
    }

    /// Held and marked transferred at `t0() + 1h`
    pub async fn transferred(&self, agreed_price: i64) -> Transaction {
        let tx = self.held(agreed_price).await;
        self.transactions
            .mark_transferred(tx.id, self.seller, t0() + Duration::hours(1))
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: i64) -> Transaction {
        self.store.get_transaction(id).await.unwrap().unwrap()
    }
}

pub fn listing(id: i64, seller_id: Uuid) -> Listing {
    Listing {
        id,
        seller_id,
        category: "concerts".to_string(),
        title: "Two floor tickets".to_string(),
        description: "Reservation under my name, transferable".to_string(),
        asking_price: 1_000,
        original_price: None,
        image_hashes: vec![format!("img-{}", id)],
        event_date: None,
        status: ListingStatus::Active,
        seller_ip: Some("198.51.100.20".to_string()),
        created_at: t0() - Duration::days(30),
    }
}

pub fn newcomer(id: Uuid) -> UserProfile {
    UserProfile {
        id,
        account_created_at: Some(t0() - Duration::days(1)),
        verification_level: 0,
        completed_transactions: 0,
        tax_id: None,
    }
}
