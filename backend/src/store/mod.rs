//! Persistence layer
//!
//! Each aggregate gets its own trait so services only see the operations they
//! need. Every lifecycle write is a compare-and-set against the current status:
//! a method that can lose a race returns `Ok(None)` instead of an error, and the
//! caller decides how to report it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::chat::violations::{NewViolation, UserViolationData};
use crate::dispute::{Dispute, DisputeResolution, DisputeStatus, NewDispute, OpenDisputeOutcome};
use crate::models::{Listing, UserProfile};
use crate::services::fraud_review::{FraudReview, NewFraudReview};
use crate::transaction::{
    NewPayment, NewTransaction, Payment, PaymentDirection, PaymentUpdate, Transaction,
    TransactionStatus, TransitionPatch,
};
use crate::vendor_approval::{ApprovalPatch, ApprovalStatus, NewVendorApproval, VendorApproval};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A unique constraint rejected the write; carries the constraint name
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::UniqueViolation(db_err.constraint().unwrap_or("unknown").to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fails with `UniqueViolation` when the code is taken
    async fn insert_transaction(&self, new: NewTransaction) -> StoreResult<Transaction>;

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>>;

    /// Transactions where the user is buyer or seller, newest first
    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// Atomically move to `to` if the current status is one of `expected`.
    /// Returns `None` when the guard fails.
    async fn transition(
        &self,
        id: i64,
        expected: &[TransactionStatus],
        to: TransactionStatus,
        patch: TransitionPatch,
    ) -> StoreResult<Option<Transaction>>;

    async fn increment_failed_payment_attempts(&self, id: i64) -> StoreResult<Option<Transaction>>;

    /// `TRANSFER_PENDING` transactions whose release date is at or before `now`
    async fn list_due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// Unpaid transactions past their payment deadline
    async fn list_payment_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// At most one non-failed charge and one payout per transaction
    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment>;

    /// The charge or payout of a transaction that has not failed
    async fn find_active_payment(
        &self,
        transaction_id: i64,
        direction: PaymentDirection,
    ) -> StoreResult<Option<Payment>>;

    async fn get_payout(&self, transaction_id: i64) -> StoreResult<Option<Payment>>;

    async fn get_payment_by_gateway_id(&self, gateway_id: &str) -> StoreResult<Option<Payment>>;

    async fn update_payment(&self, id: i64, update: PaymentUpdate) -> StoreResult<Option<Payment>>;

    async fn list_payments_for_transaction(&self, transaction_id: i64) -> StoreResult<Vec<Payment>>;

    /// Failed payouts that still have attempts left
    async fn list_failed_payouts(&self, max_attempts: i32, limit: i64) -> StoreResult<Vec<Payment>>;
}

#[async_trait]
pub trait DisputeStore: Send + Sync {
    /// Insert the dispute and move the transaction to `DISPUTE_OPENED` in one
    /// atomic step. Duplicate and state checks happen inside the same boundary.
    async fn open_dispute(
        &self,
        new: NewDispute,
        allowed: &[TransactionStatus],
    ) -> StoreResult<OpenDisputeOutcome>;

    async fn find_active_dispute(
        &self,
        transaction_id: i64,
        opener_id: Uuid,
    ) -> StoreResult<Option<Dispute>>;

    async fn get_dispute(&self, id: i64) -> StoreResult<Option<Dispute>>;

    async fn list_disputes_for_transaction(&self, transaction_id: i64) -> StoreResult<Vec<Dispute>>;

    async fn update_dispute_status(
        &self,
        id: i64,
        expected: &[DisputeStatus],
        to: DisputeStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Dispute>>;

    /// Close an active dispute. The transaction moves to `DISPUTE_RESOLVED`
    /// once no active dispute remains on it. Returns `None` when the dispute
    /// was no longer active.
    async fn resolve_dispute(
        &self,
        id: i64,
        resolution: DisputeResolution,
        resolver: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Transaction)>>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Fails with `UniqueViolation` if a pending or approved record exists
    async fn insert_approval(&self, new: NewVendorApproval) -> StoreResult<VendorApproval>;

    async fn find_blocking_approval(&self, transaction_id: i64)
        -> StoreResult<Option<VendorApproval>>;

    async fn get_approval_by_token(&self, token: &str) -> StoreResult<Option<VendorApproval>>;

    async fn update_approval_status(
        &self,
        id: i64,
        expected: ApprovalStatus,
        to: ApprovalStatus,
        patch: ApprovalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VendorApproval>>;

    async fn list_approvals_for_transaction(
        &self,
        transaction_id: i64,
    ) -> StoreResult<Vec<VendorApproval>>;
}

#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Empty data for users without violations
    async fn get_violations(&self, user_id: Uuid) -> StoreResult<UserViolationData>;

    /// Atomic append + increment
    async fn record_violation(
        &self,
        user_id: Uuid,
        violation: NewViolation,
        now: DateTime<Utc>,
    ) -> StoreResult<UserViolationData>;

    async fn reset_violations(&self, user_id: Uuid) -> StoreResult<UserViolationData>;
}

/// Read access to marketplace data plus the fraud review queue
#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    async fn get_listing(&self, id: i64) -> StoreResult<Option<Listing>>;

    async fn list_active_listings_in_category(
        &self,
        category: &str,
        limit: i64,
    ) -> StoreResult<Vec<Listing>>;

    async fn list_active_listings_by_seller(&self, seller_id: Uuid) -> StoreResult<Vec<Listing>>;

    /// Returns false when the listing does not exist
    async fn mark_listing_sold(&self, id: i64) -> StoreResult<bool>;

    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>>;

    async fn upsert_fraud_review(&self, review: NewFraudReview) -> StoreResult<FraudReview>;

    async fn list_fraud_reviews(&self, limit: i64, offset: i64) -> StoreResult<Vec<FraudReview>>;
}

/// Everything the services need, as one trait object
pub trait Store:
    TransactionStore + PaymentStore + DisputeStore + ApprovalStore + ViolationStore + MarketplaceStore
{
}

impl<T> Store for T where
    T: TransactionStore
        + PaymentStore
        + DisputeStore
        + ApprovalStore
        + ViolationStore
        + MarketplaceStore
{
}
