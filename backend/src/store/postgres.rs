//! PostgreSQL store
//!
//! Status guards are expressed in the `WHERE` clause of each `UPDATE`, so
//! concurrent writers on different instances serialize on the row itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    ApprovalStore, DisputeStore, MarketplaceStore, PaymentStore, StoreError, StoreResult,
    TransactionStore, ViolationStore,
};
use crate::chat::violations::{NewViolation, UserViolationData, ViolationRecord};
use crate::dispute::{Dispute, DisputeResolution, DisputeStatus, NewDispute, OpenDisputeOutcome};
use crate::models::{Listing, UserProfile};
use crate::services::fraud_review::{FraudReview, NewFraudReview, ReviewSubject};
use crate::services::fraud_scorer::{FraudSignal, RiskLevel};
use crate::transaction::{
    NewPayment, NewTransaction, Payment, PaymentDirection, PaymentUpdate, Transaction,
    TransactionStatus, TransitionPatch,
};
use crate::vendor_approval::{ApprovalPatch, ApprovalStatus, NewVendorApproval, VendorApproval};

const DISPUTE_PROTOCOL_CONSTRAINT: &str = "disputes_protocol_key";
const DISPUTE_ACTIVE_CONSTRAINT: &str = "disputes_active_per_opener_idx";

/// sqlx-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn status_texts<T>(values: &[T], to_text: impl Fn(&T) -> String) -> Vec<String> {
    values.iter().map(to_text).collect()
}

fn dispute_status_text(status: &DisputeStatus) -> String {
    match status {
        DisputeStatus::Open => "OPEN",
        DisputeStatus::UnderReview => "UNDER_REVIEW",
        DisputeStatus::ResolvedBuyer => "RESOLVED_BUYER",
        DisputeStatus::ResolvedSeller => "RESOLVED_SELLER",
        DisputeStatus::Closed => "CLOSED",
    }
    .to_string()
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    user_id: Uuid,
    violation_count: i64,
    violations: Json<Vec<ViolationRecord>>,
    last_violation_at: Option<DateTime<Utc>>,
}

impl From<ViolationRow> for UserViolationData {
    fn from(row: ViolationRow) -> Self {
        UserViolationData::from_parts(
            row.user_id,
            row.violation_count,
            row.violations.0,
            row.last_violation_at,
        )
    }
}

#[derive(sqlx::FromRow)]
struct FraudReviewRow {
    id: i64,
    subject_kind: ReviewSubject,
    subject_id: i64,
    score: i32,
    risk_level: RiskLevel,
    signals: Json<Vec<FraudSignal>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FraudReviewRow> for FraudReview {
    fn from(row: FraudReviewRow) -> Self {
        FraudReview {
            id: row.id,
            subject_kind: row.subject_kind,
            subject_id: row.subject_id,
            score: row.score,
            risk_level: row.risk_level,
            signals: row.signals.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl TransactionStore for PgStore {
    async fn insert_transaction(&self, new: NewTransaction) -> StoreResult<Transaction> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                code, listing_id, buyer_id, seller_id, agreed_price, platform_fee,
                platform_fee_rate_bps, seller_net_amount, status, payment_deadline,
                buyer_ip, seller_ip, first_viewed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'INITIATED', $9, $10, $11, $12, $13, $13)
            RETURNING *
            "#,
        )
        .bind(&new.code)
        .bind(new.listing_id)
        .bind(new.buyer_id)
        .bind(new.seller_id)
        .bind(new.agreed_price)
        .bind(new.platform_fee)
        .bind(new.platform_fee_rate_bps)
        .bind(new.seller_net_amount)
        .bind(new.payment_deadline)
        .bind(&new.buyer_ip)
        .bind(&new.seller_ip)
        .bind(new.first_viewed_at)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn get_transaction(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(transaction)
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE (buyer_id = $1 OR seller_id = $1)
              AND ($2::transaction_status IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn transition(
        &self,
        id: i64,
        expected: &[TransactionStatus],
        to: TransactionStatus,
        patch: TransitionPatch,
    ) -> StoreResult<Option<Transaction>> {
        let expected = status_texts(expected, |s| s.as_str().to_string());

        let updated = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions SET
                status = $2,
                payment_confirmed_at = COALESCE($3, payment_confirmed_at),
                transferred_at = COALESCE($4, transferred_at),
                escrow_release_date = COALESCE($5, escrow_release_date),
                buyer_confirmed_at = COALESCE($6, buyer_confirmed_at),
                auto_release = COALESCE($7, auto_release),
                completed_at = COALESCE($8, completed_at),
                cancelled_at = COALESCE($9, cancelled_at),
                cancel_reason = COALESCE($10, cancel_reason),
                refunded_at = COALESCE($11, refunded_at),
                updated_at = NOW()
            WHERE id = $1 AND status::text = ANY($12)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(patch.payment_confirmed_at)
        .bind(patch.transferred_at)
        .bind(patch.escrow_release_date)
        .bind(patch.buyer_confirmed_at)
        .bind(patch.auto_release)
        .bind(patch.completed_at)
        .bind(patch.cancelled_at)
        .bind(patch.cancel_reason)
        .bind(patch.refunded_at)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(updated);
        }

        let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM transactions WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists.0 {
            Ok(None)
        } else {
            Err(StoreError::NotFound(format!("transaction {}", id)))
        }
    }

    async fn increment_failed_payment_attempts(&self, id: i64) -> StoreResult<Option<Transaction>> {
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET failed_payment_attempts = failed_payment_attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn list_due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE status = 'TRANSFER_PENDING'
              AND escrow_release_date IS NOT NULL
              AND escrow_release_date <= $1
            ORDER BY escrow_release_date, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_payment_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE status IN ('INITIATED', 'AWAITING_PAYMENT')
              AND payment_deadline < $1
            ORDER BY payment_deadline, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE status = $1 ORDER BY id LIMIT $2",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, new: NewPayment) -> StoreResult<Payment> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                transaction_id, direction, payer_id, payee_id, gateway_id,
                gross_amount, net_amount, method, status, attempts, last_error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1, $10)
            RETURNING *
            "#,
        )
        .bind(new.transaction_id)
        .bind(new.direction)
        .bind(new.payer_id)
        .bind(new.payee_id)
        .bind(&new.gateway_id)
        .bind(new.gross_amount)
        .bind(new.net_amount)
        .bind(new.method)
        .bind(new.status)
        .bind(&new.last_error)
        .fetch_one(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn find_active_payment(
        &self,
        transaction_id: i64,
        direction: PaymentDirection,
    ) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE transaction_id = $1 AND direction = $2 AND status <> 'failed'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(transaction_id)
        .bind(direction)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn get_payout(&self, transaction_id: i64) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE transaction_id = $1 AND direction = 'payout'",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn get_payment_by_gateway_id(&self, gateway_id: &str) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE gateway_id = $1")
            .bind(gateway_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(payment)
    }

    async fn update_payment(&self, id: i64, update: PaymentUpdate) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET
                status = $2,
                gateway_id = COALESCE($3, gateway_id),
                last_error = $4,
                attempts = attempts + CASE WHEN $5 THEN 1 ELSE 0 END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(&update.gateway_id)
        .bind(&update.last_error)
        .bind(update.increment_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn list_payments_for_transaction(&self, transaction_id: i64) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE transaction_id = $1 ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_failed_payouts(&self, max_attempts: i32, limit: i64) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE direction = 'payout' AND status = 'failed' AND attempts < $1
            ORDER BY updated_at, id
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl DisputeStore for PgStore {
    async fn open_dispute(
        &self,
        new: NewDispute,
        allowed: &[TransactionStatus],
    ) -> StoreResult<OpenDisputeOutcome> {
        let mut db_tx = self.pool.begin().await?;

        let status = sqlx::query_as::<_, (TransactionStatus,)>(
            "SELECT status FROM transactions WHERE id = $1 FOR UPDATE",
        )
        .bind(new.transaction_id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("transaction {}", new.transaction_id)))?
        .0;

        let duplicate: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM disputes
                WHERE transaction_id = $1 AND opener_id = $2
                  AND status IN ('OPEN', 'UNDER_REVIEW')
            )
            "#,
        )
        .bind(new.transaction_id)
        .bind(new.opener_id)
        .fetch_one(&mut *db_tx)
        .await?;
        if duplicate.0 {
            return Ok(OpenDisputeOutcome::ActiveDisputeExists);
        }

        if !allowed.contains(&status) {
            return Ok(OpenDisputeOutcome::InvalidState(status));
        }

        let inserted = sqlx::query_as::<_, Dispute>(
            r#"
            INSERT INTO disputes (
                protocol, transaction_id, opener_id, reason, description, evidence,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'OPEN', $7, $7)
            RETURNING *
            "#,
        )
        .bind(&new.protocol)
        .bind(new.transaction_id)
        .bind(new.opener_id)
        .bind(new.reason)
        .bind(&new.description)
        .bind(&new.evidence)
        .bind(new.created_at)
        .fetch_one(&mut *db_tx)
        .await;

        let dispute = match inserted.map_err(StoreError::from) {
            Ok(dispute) => dispute,
            Err(StoreError::UniqueViolation(constraint)) if constraint == DISPUTE_PROTOCOL_CONSTRAINT => {
                return Ok(OpenDisputeOutcome::ProtocolTaken);
            }
            Err(StoreError::UniqueViolation(constraint)) if constraint == DISPUTE_ACTIVE_CONSTRAINT => {
                return Ok(OpenDisputeOutcome::ActiveDisputeExists);
            }
            Err(e) => return Err(e),
        };

        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions SET status = 'DISPUTE_OPENED', updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(new.transaction_id)
        .bind(new.created_at)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;

        Ok(OpenDisputeOutcome::Opened(dispute, transaction))
    }

    async fn find_active_dispute(
        &self,
        transaction_id: i64,
        opener_id: Uuid,
    ) -> StoreResult<Option<Dispute>> {
        let dispute = sqlx::query_as::<_, Dispute>(
            r#"
            SELECT * FROM disputes
            WHERE transaction_id = $1 AND opener_id = $2
              AND status IN ('OPEN', 'UNDER_REVIEW')
            "#,
        )
        .bind(transaction_id)
        .bind(opener_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dispute)
    }

    async fn get_dispute(&self, id: i64) -> StoreResult<Option<Dispute>> {
        let dispute = sqlx::query_as::<_, Dispute>("SELECT * FROM disputes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(dispute)
    }

    async fn list_disputes_for_transaction(&self, transaction_id: i64) -> StoreResult<Vec<Dispute>> {
        let rows = sqlx::query_as::<_, Dispute>(
            "SELECT * FROM disputes WHERE transaction_id = $1 ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn update_dispute_status(
        &self,
        id: i64,
        expected: &[DisputeStatus],
        to: DisputeStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Dispute>> {
        let expected = status_texts(expected, dispute_status_text);

        let dispute = sqlx::query_as::<_, Dispute>(
            r#"
            UPDATE disputes SET status = $2, updated_at = $3
            WHERE id = $1 AND status::text = ANY($4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(now)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await?;

        if dispute.is_none() && self.get_dispute(id).await?.is_none() {
            return Err(StoreError::NotFound(format!("dispute {}", id)));
        }

        Ok(dispute)
    }

    async fn resolve_dispute(
        &self,
        id: i64,
        resolution: DisputeResolution,
        resolver: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<(Dispute, Transaction)>> {
        let mut db_tx = self.pool.begin().await?;

        let transaction_id = sqlx::query_as::<_, (i64,)>(
            "SELECT transaction_id FROM disputes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("dispute {}", id)))?
        .0;

        // Lock the transaction first so concurrent resolutions see each other.
        sqlx::query("SELECT id FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(transaction_id)
            .execute(&mut *db_tx)
            .await?;

        let status: DisputeStatus = resolution.into();
        let dispute = sqlx::query_as::<_, Dispute>(
            r#"
            UPDATE disputes SET
                status = $2, resolution_notes = $3, resolved_by = $4,
                resolved_at = $5, updated_at = $5
            WHERE id = $1 AND status IN ('OPEN', 'UNDER_REVIEW')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(&notes)
        .bind(resolver)
        .bind(now)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(dispute) = dispute else {
            return Ok(None);
        };

        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions SET
                status = CASE
                    WHEN status = 'DISPUTE_OPENED' AND NOT EXISTS (
                        SELECT 1 FROM disputes
                        WHERE transaction_id = $1 AND status IN ('OPEN', 'UNDER_REVIEW')
                    ) THEN 'DISPUTE_RESOLVED'::transaction_status
                    ELSE status
                END,
                updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(transaction_id)
        .bind(now)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;

        Ok(Some((dispute, transaction)))
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn insert_approval(&self, new: NewVendorApproval) -> StoreResult<VendorApproval> {
        let approval = sqlx::query_as::<_, VendorApproval>(
            r#"
            INSERT INTO vendor_approvals (
                token, transaction_id, listing_id, requested_by, vendor_name,
                vendor_email, vendor_phone, status, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $9)
            RETURNING *
            "#,
        )
        .bind(&new.token)
        .bind(new.transaction_id)
        .bind(new.listing_id)
        .bind(new.requested_by)
        .bind(&new.vendor_name)
        .bind(&new.vendor_email)
        .bind(&new.vendor_phone)
        .bind(new.expires_at)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(approval)
    }

    async fn find_blocking_approval(
        &self,
        transaction_id: i64,
    ) -> StoreResult<Option<VendorApproval>> {
        let approval = sqlx::query_as::<_, VendorApproval>(
            r#"
            SELECT * FROM vendor_approvals
            WHERE transaction_id = $1 AND status IN ('pending', 'approved')
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(approval)
    }

    async fn get_approval_by_token(&self, token: &str) -> StoreResult<Option<VendorApproval>> {
        let approval =
            sqlx::query_as::<_, VendorApproval>("SELECT * FROM vendor_approvals WHERE token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        Ok(approval)
    }

    async fn update_approval_status(
        &self,
        id: i64,
        expected: ApprovalStatus,
        to: ApprovalStatus,
        patch: ApprovalPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VendorApproval>> {
        let approval = sqlx::query_as::<_, VendorApproval>(
            r#"
            UPDATE vendor_approvals SET
                status = $3,
                responded_at = COALESCE($4, responded_at),
                responder_ip = COALESCE($5, responder_ip),
                rejection_reason = COALESCE($6, rejection_reason),
                updated_at = $7
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(to)
        .bind(patch.responded_at)
        .bind(&patch.responder_ip)
        .bind(&patch.rejection_reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(approval)
    }

    async fn list_approvals_for_transaction(
        &self,
        transaction_id: i64,
    ) -> StoreResult<Vec<VendorApproval>> {
        let rows = sqlx::query_as::<_, VendorApproval>(
            "SELECT * FROM vendor_approvals WHERE transaction_id = $1 ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl ViolationStore for PgStore {
    async fn get_violations(&self, user_id: Uuid) -> StoreResult<UserViolationData> {
        let row = sqlx::query_as::<_, ViolationRow>(
            r#"
            SELECT user_id, violation_count, violations, last_violation_at
            FROM user_violations WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(UserViolationData::from)
            .unwrap_or_else(|| UserViolationData::empty(user_id)))
    }

    async fn record_violation(
        &self,
        user_id: Uuid,
        violation: NewViolation,
        now: DateTime<Utc>,
    ) -> StoreResult<UserViolationData> {
        let record = ViolationRecord {
            conversation_id: violation.conversation_id,
            violation_type: violation.violation_type,
            snippet: violation.snippet,
            occurred_at: now,
        };

        // Single upsert: the increment and the append happen under the row lock.
        let row = sqlx::query_as::<_, ViolationRow>(
            r#"
            INSERT INTO user_violations (user_id, violation_count, violations, last_violation_at, updated_at)
            VALUES ($1, 1, jsonb_build_array($2::jsonb), $3, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                violation_count = user_violations.violation_count + 1,
                violations = user_violations.violations || jsonb_build_array($2::jsonb),
                last_violation_at = $3,
                updated_at = $3
            RETURNING user_id, violation_count, violations, last_violation_at
            "#,
        )
        .bind(user_id)
        .bind(Json(&record))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn reset_violations(&self, user_id: Uuid) -> StoreResult<UserViolationData> {
        sqlx::query("DELETE FROM user_violations WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(UserViolationData::empty(user_id))
    }
}

#[async_trait]
impl MarketplaceStore for PgStore {
    async fn get_listing(&self, id: i64) -> StoreResult<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(listing)
    }

    async fn list_active_listings_in_category(
        &self,
        category: &str,
        limit: i64,
    ) -> StoreResult<Vec<Listing>> {
        let rows = sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM listings
            WHERE status = 'active' AND category = $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_active_listings_by_seller(&self, seller_id: Uuid) -> StoreResult<Vec<Listing>> {
        let rows = sqlx::query_as::<_, Listing>(
            "SELECT * FROM listings WHERE status = 'active' AND seller_id = $1 ORDER BY id",
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_listing_sold(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE listings SET status = 'sold' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_profile(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    async fn upsert_fraud_review(&self, review: NewFraudReview) -> StoreResult<FraudReview> {
        let row = sqlx::query_as::<_, FraudReviewRow>(
            r#"
            INSERT INTO fraud_reviews (
                subject_kind, subject_id, score, risk_level, signals, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (subject_kind, subject_id) DO UPDATE SET
                score = EXCLUDED.score,
                risk_level = EXCLUDED.risk_level,
                signals = EXCLUDED.signals,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(review.subject_kind)
        .bind(review.subject_id)
        .bind(review.score.score)
        .bind(review.score.risk)
        .bind(Json(&review.score.signals))
        .bind(review.now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_fraud_reviews(&self, limit: i64, offset: i64) -> StoreResult<Vec<FraudReview>> {
        let rows = sqlx::query_as::<_, FraudReviewRow>(
            "SELECT * FROM fraud_reviews ORDER BY score DESC, id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FraudReview::from).collect())
    }
}
