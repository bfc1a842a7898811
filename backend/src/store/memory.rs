//! In-memory store for tests and local development
//!
//! All tables sit behind one `RwLock`, so every write that touches more than one
//! table is atomic, and unique constraints mirror the SQL schema.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ApprovalStore, DisputeStore, MarketplaceStore, PaymentStore, StoreError, StoreResult,
    TransactionStore, ViolationStore,
};
use crate::chat::violations::{NewViolation, UserViolationData, ViolationRecord};
use crate::dispute::{Dispute, DisputeResolution, DisputeStatus, NewDispute, OpenDisputeOutcome};
use crate::models::{Listing, ListingStatus, UserProfile};
use crate::services::fraud_review::{FraudReview, NewFraudReview, ReviewSubject};
use crate::transaction::{
    NewPayment, NewTransaction, Payment, PaymentDirection, PaymentStatus, PaymentUpdate,
    Transaction, TransactionStatus, TransitionPatch,
};
use crate::vendor_approval::{ApprovalPatch, ApprovalStatus, NewVendorApproval, VendorApproval};

#[derive(Debug, Default)]
struct Tables {
    transactions: HashMap<i64, Transaction>,
    payments: HashMap<i64, Payment>,
    disputes: HashMap<i64, Dispute>,
    approvals: HashMap<i64, VendorApproval>,
    violations: HashMap<Uuid, UserViolationData>,
    listings: HashMap<i64, Listing>,
    profiles: HashMap<Uuid, UserProfile>,
    reviews: HashMap<(ReviewSubject, i64), FraudReview>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_active_dispute(&self, transaction_id: i64) -> bool {
        self.disputes
            .values()
            .any(|d| d.transaction_id == transaction_id && d.status.is_active())
    }
}

/// Thread-safe in-memory implementation of every store trait
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
    fail_payment_updates: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_listing(&self, listing: Listing) {
        self.inner.write().await.listings.insert(listing.id, listing);
    }

    pub async fn seed_profile(&self, profile: UserProfile) {
        self.inner.write().await.profiles.insert(profile.id, profile);
    }

    /// Make `update_payment` fail with a database error until switched off
    pub fn set_fail_payment_updates(&self, fail: bool) {
        self.fail_payment_updates.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a transaction, bypassing lifecycle checks
    pub async fn put_transaction(&self, transaction: Transaction) {
        self.inner
            .write()
            .await
            .transactions
            .insert(transaction.id, transaction);
    }
}

fn apply_patch(tx: &mut Transaction, patch: TransitionPatch) {
    if let Some(v) = patch.payment_confirmed_at {
        tx.payment_confirmed_at = Some(v);
    }
    if let Some(v) = patch.transferred_at {
        tx.transferred_at = Some(v);
    }
    if let Some(v) = patch.escrow_release_date {
        tx.escrow_release_date = Some(v);
    }
    if let Some(v) = patch.buyer_confirmed_at {
        tx.buyer_confirmed_at = Some(v);
    }
    if let Some(v) = patch.auto_release {
        tx.auto_release = v;
    }
    if let Some(v) = patch.completed_at {
        tx.completed_at = Some(v);
    }
    if let Some(v) = patch.cancelled_at {
        tx.cancelled_at = Some(v);
    }
    if let Some(v) = patch.cancel_reason {
        tx.cancel_reason = Some(v);
    }
    if let Some(v) = patch.refunded_at {
        tx.refunded_at = Some(v);
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, new: NewTransaction) -> StoreResult<Transaction> {
        let mut tables = self.inner.write().await;
        if tables.transactions.values().any(|t| t.code == new.code) {
            return Err(StoreError::UniqueViolation("transactions_code_key".into()));
        }
        let id = tables.next_id();
        let transaction = Transaction {
            id,
            code: new.code,
            listing_id: new.listing_id,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            agreed_price: new.agreed_price,
            platform_fee: new.platform_fee,
            platform_fee_rate_bps: new.platform_fee_rate_bps,
            seller_net_amount: new.seller_net_amount,
            status: TransactionStatus::Initiated,
            payment_deadline: new.payment_deadline,
            payment_confirmed_at: None,
            transferred_at: None,
            escrow_release_date: None,
            buyer_confirmed_at: None,
            auto_release: false,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            refunded_at: None,
            buyer_ip: new.buyer_ip,
            seller_ip: new.seller_ip,
            first_viewed_at: new.first_viewed_at,
            failed_payment_attempts: 0,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        tables.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>> {
        Ok(self.inner.read().await.transactions.get(&id).cloned())
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.is_party(user_id))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn transition(
        &self,
        id: i64,
        expected: &[TransactionStatus],
        to: TransactionStatus,
        patch: TransitionPatch,
    ) -> StoreResult<Option<Transaction>> {
        let mut tables = self.inner.write().await;
        let Some(tx) = tables.transactions.get_mut(&id) else {
            return Err(StoreError::NotFound(format!("transaction {}", id)));
        };
        if !expected.contains(&tx.status) {
            return Ok(None);
        }
        tx.status = to;
        apply_patch(tx, patch);
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn increment_failed_payment_attempts(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let mut tables = self.inner.write().await;
        Ok(tables.transactions.get_mut(&id).map(|tx| {
            tx.failed_payment_attempts += 1;
            tx.updated_at = Utc::now();
            tx.clone()
        }))
    }

    async fn list_due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::TransferPending)
            .filter(|t| t.escrow_release_date.map_or(false, |d| d <= now))
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.escrow_release_date, t.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_payment_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransactionStatus::Initiated | TransactionStatus::AwaitingPayment
                )
            })
            .filter(|t| t.payment_deadline < now)
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.payment_deadline, t.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.id);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let mut tables = self.inner.write().await;
        let duplicate = tables.payments.values().any(|p| {
            p.transaction_id == new.transaction_id
                && p.direction == new.direction
                && match new.direction {
                    PaymentDirection::Charge => p.status != PaymentStatus::Failed,
                    PaymentDirection::Payout => true,
                }
        });
        if duplicate {
            let constraint = match new.direction {
                PaymentDirection::Charge => "payments_active_charge_idx",
                PaymentDirection::Payout => "payments_single_payout_idx",
            };
            return Err(StoreError::UniqueViolation(constraint.into()));
        }

        let id = tables.next_id();
        let now = Utc::now();
        let payment = Payment {
            id,
            transaction_id: new.transaction_id,
            direction: new.direction,
            payer_id: new.payer_id,
            payee_id: new.payee_id,
            gateway_id: new.gateway_id,
            gross_amount: new.gross_amount,
            net_amount: new.net_amount,
            method: new.method,
            status: new.status,
            attempts: 1,
            last_error: new.last_error,
            created_at: now,
            updated_at: now,
        };
        tables.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn find_active_payment(
        &self,
        transaction_id: i64,
        direction: PaymentDirection,
    ) -> StoreResult<Option<Payment>> {
        let tables = self.inner.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| {
                p.transaction_id == transaction_id
                    && p.direction == direction
                    && p.status != PaymentStatus::Failed
            })
            .cloned())
    }

    async fn get_payout(&self, transaction_id: i64) -> StoreResult<Option<Payment>> {
        let tables = self.inner.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id && p.direction == PaymentDirection::Payout)
            .cloned())
    }

    async fn get_payment_by_gateway_id(&self, gateway_id: &str) -> StoreResult<Option<Payment>> {
        let tables = self.inner.read().await;
        Ok(tables
            .payments
            .values()
            .find(|p| p.gateway_id.as_deref() == Some(gateway_id))
            .cloned())
    }

    async fn update_payment(&self, id: i64, update: PaymentUpdate) -> StoreResult<Option<Payment>> {
        if self.fail_payment_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Database("payment updates unavailable".into()));
        }
        let mut tables = self.inner.write().await;
        Ok(tables.payments.get_mut(&id).map(|p| {
            p.status = update.status;
            if update.gateway_id.is_some() {
                p.gateway_id = update.gateway_id;
            }
            p.last_error = update.last_error;
            if update.increment_attempts {
                p.attempts += 1;
            }
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn list_payments_for_transaction(&self, transaction_id: i64) -> StoreResult<Vec<Payment>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.transaction_id == transaction_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.id);
        Ok(rows)
    }

    async fn list_failed_payouts(&self, max_attempts: i32, limit: i64) -> StoreResult<Vec<Payment>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| {
                p.direction == PaymentDirection::Payout
                    && p.status == PaymentStatus::Failed
                    && p.attempts < max_attempts
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.id);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl DisputeStore for MemoryStore {
    async fn open_dispute(
        &self,
        new: NewDispute,
        allowed: &[TransactionStatus],
    ) -> StoreResult<OpenDisputeOutcome> {
        let mut tables = self.inner.write().await;

        let status = tables
            .transactions
            .get(&new.transaction_id)
            .map(|t| t.status)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", new.transaction_id)))?;

        let duplicate = tables.disputes.values().any(|d| {
            d.transaction_id == new.transaction_id
                && d.opener_id == new.opener_id
                && d.status.is_active()
        });
        if duplicate {
            return Ok(OpenDisputeOutcome::ActiveDisputeExists);
        }
        if !allowed.contains(&status) {
            return Ok(OpenDisputeOutcome::InvalidState(status));
        }
        if tables.disputes.values().any(|d| d.protocol == new.protocol) {
            return Ok(OpenDisputeOutcome::ProtocolTaken);
        }

        let id = tables.next_id();
        let dispute = Dispute {
            id,
            protocol: new.protocol,
            transaction_id: new.transaction_id,
            opener_id: new.opener_id,
            reason: new.reason,
            description: new.description,
            evidence: new.evidence,
            status: DisputeStatus::Open,
            resolution_notes: None,
            resolved_by: None,
            resolved_at: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        tables.disputes.insert(id, dispute.clone());

        let transaction = match tables.transactions.get_mut(&new.transaction_id) {
            Some(tx) => {
                tx.status = TransactionStatus::DisputeOpened;
                tx.updated_at = new.created_at;
                tx.clone()
            }
            None => return Err(StoreError::NotFound(format!("transaction {}", new.transaction_id))),
        };

        Ok(OpenDisputeOutcome::Opened(dispute, transaction))
    }

    async fn find_active_dispute(
        &self,
        transaction_id: i64,
        opener_id: Uuid,
    ) -> StoreResult<Option<Dispute>> {
        let tables = self.inner.read().await;
        Ok(tables
            .disputes
            .values()
            .find(|d| {
                d.transaction_id == transaction_id && d.opener_id == opener_id && d.status.is_active()
            })
            .cloned())
    }

    async fn get_dispute(&self, id: i64) -> StoreResult<Option<Dispute>> {
        Ok(self.inner.read().await.disputes.get(&id).cloned())
    }

    async fn list_disputes_for_transaction(&self, transaction_id: i64) -> StoreResult<Vec<Dispute>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Dispute> = tables
            .disputes
            .values()
            .filter(|d| d.transaction_id == transaction_id)
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.id);
        Ok(rows)
    }

    async fn update_dispute_status(
        &self,
        id: i64,
        expected: &[DisputeStatus],
        to: DisputeStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Dispute>> {
        let mut tables = self.inner.write().await;
        let Some(dispute) = tables.disputes.get_mut(&id) else {
            return Err(StoreError::NotFound(format!("dispute {}", id)));
        };
        if !expected.contains(&dispute.status) {
            return Ok(None);
        }
        dispute.status = to;
        dispute.updated_at = now;
        Ok(Some(dispute.clone()))
    }

    async fn resolve_dispute(
        &self,
        id: i64,
        resolution: DisputeResolution,
        resolver: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Transaction)>> {
        let mut tables = self.inner.write().await;

        let dispute = match tables.disputes.get_mut(&id) {
            Some(d) if d.status.is_active() => {
                d.status = resolution.into();
                d.resolution_notes = notes;
                d.resolved_by = Some(resolver);
                d.resolved_at = Some(now);
                d.updated_at = now;
                d.clone()
            }
            Some(_) => return Ok(None),
            None => return Err(StoreError::NotFound(format!("dispute {}", id))),
        };

        let others_active = tables.has_active_dispute(dispute.transaction_id);
        let transaction = match tables.transactions.get_mut(&dispute.transaction_id) {
            Some(tx) => {
                if !others_active && tx.status == TransactionStatus::DisputeOpened {
                    tx.status = TransactionStatus::DisputeResolved;
                    tx.updated_at = now;
                }
                tx.clone()
            }
            None => {
                return Err(StoreError::NotFound(format!(
                    "transaction {}",
                    dispute.transaction_id
                )))
            }
        };

        Ok(Some((dispute, transaction)))
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn insert_approval(&self, new: NewVendorApproval) -> StoreResult<VendorApproval> {
        let mut tables = self.inner.write().await;
        if tables.approvals.values().any(|a| a.token == new.token) {
            return Err(StoreError::UniqueViolation("vendor_approvals_token_key".into()));
        }
        if tables
            .approvals
            .values()
            .any(|a| a.transaction_id == new.transaction_id && a.status.blocks_new_request())
        {
            return Err(StoreError::UniqueViolation(
                "vendor_approvals_blocking_idx".into(),
            ));
        }

        let id = tables.next_id();
        let approval = VendorApproval {
            id,
            token: new.token,
            transaction_id: new.transaction_id,
            listing_id: new.listing_id,
            requested_by: new.requested_by,
            vendor_name: new.vendor_name,
            vendor_email: new.vendor_email,
            vendor_phone: new.vendor_phone,
            status: ApprovalStatus::Pending,
            expires_at: new.expires_at,
            responded_at: None,
            responder_ip: None,
            rejection_reason: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        tables.approvals.insert(id, approval.clone());
        Ok(approval)
    }

    async fn find_blocking_approval(
        &self,
        transaction_id: i64,
    ) -> StoreResult<Option<VendorApproval>> {
        let tables = self.inner.read().await;
        Ok(tables
            .approvals
            .values()
            .find(|a| a.transaction_id == transaction_id && a.status.blocks_new_request())
            .cloned())
    }

    async fn get_approval_by_token(&self, token: &str) -> StoreResult<Option<VendorApproval>> {
        let tables = self.inner.read().await;
        Ok(tables.approvals.values().find(|a| a.token == token).cloned())
    }

    async fn update_approval_status(
        &self,
        id: i64,
        expected: ApprovalStatus,
        to: ApprovalStatus,
        patch: ApprovalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VendorApproval>> {
        let mut tables = self.inner.write().await;
        let Some(approval) = tables.approvals.get_mut(&id) else {
            return Err(StoreError::NotFound(format!("vendor approval {}", id)));
        };
        if approval.status != expected {
            return Ok(None);
        }
        approval.status = to;
        if patch.responded_at.is_some() {
            approval.responded_at = patch.responded_at;
        }
        if patch.responder_ip.is_some() {
            approval.responder_ip = patch.responder_ip;
        }
        if patch.rejection_reason.is_some() {
            approval.rejection_reason = patch.rejection_reason;
        }
        approval.updated_at = now;
        Ok(Some(approval.clone()))
    }

    async fn list_approvals_for_transaction(
        &self,
        transaction_id: i64,
    ) -> StoreResult<Vec<VendorApproval>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<VendorApproval> = tables
            .approvals
            .values()
            .filter(|a| a.transaction_id == transaction_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.id);
        Ok(rows)
    }
}

#[async_trait]
impl ViolationStore for MemoryStore {
    async fn get_violations(&self, user_id: Uuid) -> StoreResult<UserViolationData> {
        let tables = self.inner.read().await;
        Ok(tables
            .violations
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserViolationData::empty(user_id)))
    }

    async fn record_violation(
        &self,
        user_id: Uuid,
        violation: NewViolation,
        now: DateTime<Utc>,
    ) -> StoreResult<UserViolationData> {
        let mut tables = self.inner.write().await;
        let data = tables
            .violations
            .entry(user_id)
            .or_insert_with(|| UserViolationData::empty(user_id));
        data.record(ViolationRecord {
            conversation_id: violation.conversation_id,
            violation_type: violation.violation_type,
            snippet: violation.snippet,
            occurred_at: now,
        });
        Ok(data.clone())
    }

    async fn reset_violations(&self, user_id: Uuid) -> StoreResult<UserViolationData> {
        let mut tables = self.inner.write().await;
        tables.violations.remove(&user_id);
        Ok(UserViolationData::empty(user_id))
    }
}

#[async_trait]
impl MarketplaceStore for MemoryStore {
    async fn get_listing(&self, id: i64) -> StoreResult<Option<Listing>> {
        Ok(self.inner.read().await.listings.get(&id).cloned())
    }

    async fn list_active_listings_in_category(
        &self,
        category: &str,
        limit: i64,
    ) -> StoreResult<Vec<Listing>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Listing> = tables
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Active && l.category == category)
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.id);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn list_active_listings_by_seller(&self, seller_id: Uuid) -> StoreResult<Vec<Listing>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Listing> = tables
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Active && l.seller_id == seller_id)
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.id);
        Ok(rows)
    }

    async fn mark_listing_sold(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.inner.write().await;
        Ok(match tables.listings.get_mut(&id) {
            Some(listing) => {
                listing.status = ListingStatus::Sold;
                true
            }
            None => false,
        })
    }

    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(self.inner.read().await.profiles.get(&user_id).cloned())
    }

    async fn upsert_fraud_review(&self, review: NewFraudReview) -> StoreResult<FraudReview> {
        let mut tables = self.inner.write().await;
        let key = (review.subject_kind, review.subject_id);
        let existing = tables.reviews.get(&key).map(|r| (r.id, r.created_at));
        let (id, created_at) = match existing {
            Some(found) => found,
            None => (tables.next_id(), review.now),
        };
        let entry = FraudReview {
            id,
            subject_kind: review.subject_kind,
            subject_id: review.subject_id,
            score: review.score.score,
            risk_level: review.score.risk,
            signals: review.score.signals,
            created_at,
            updated_at: review.now,
        };
        tables.reviews.insert(key, entry.clone());
        Ok(entry)
    }

    async fn list_fraud_reviews(&self, limit: i64, offset: i64) -> StoreResult<Vec<FraudReview>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<FraudReview> = tables.reviews.values().cloned().collect();
        rows.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
