//! Fraud review queue
//!
//! Loads scorer inputs from the store, runs the pure scorers and queues
//! high-risk subjects for manual review.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::fraud_scorer::{score_listing, score_transaction, FraudScore, FraudSignal, RiskLevel};
use crate::error::{ServiceError, ServiceResult};
use crate::models::Listing;
use crate::store::Store;

/// Maximum same-category listings compared against
const COHORT_LIMIT: i64 = 200;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "review_subject", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReviewSubject {
    Listing,
    Transaction,
}

/// One entry of the manual review queue, keyed by subject
#[derive(Debug, Serialize, Clone)]
pub struct FraudReview {
    pub id: i64,
    pub subject_kind: ReviewSubject,
    pub subject_id: i64,
    pub score: i32,
    pub risk_level: RiskLevel,
    pub signals: Vec<FraudSignal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFraudReview {
    pub subject_kind: ReviewSubject,
    pub subject_id: i64,
    pub score: FraudScore,
    pub now: DateTime<Utc>,
}

/// Fraud review service
#[derive(Clone)]
pub struct FraudReviewService {
    store: Arc<dyn Store>,
}

impl FraudReviewService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Score a listing and queue it when the risk is high
    pub async fn assess_listing(&self, listing_id: i64, now: DateTime<Utc>) -> ServiceResult<FraudScore> {
        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("listing {}", listing_id)))?;

        let seller = self.store.get_profile(listing.seller_id).await?;

        let mut cohort: HashMap<i64, Listing> = HashMap::new();
        for l in self
            .store
            .list_active_listings_in_category(&listing.category, COHORT_LIMIT)
            .await?
        {
            cohort.insert(l.id, l);
        }
        for l in self
            .store
            .list_active_listings_by_seller(listing.seller_id)
            .await?
        {
            cohort.insert(l.id, l);
        }
        let mut cohort: Vec<Listing> = cohort.into_values().collect();
        cohort.sort_by_key(|l| l.id);

        let score = score_listing(&listing, seller.as_ref(), &cohort, now);
        self.queue_if_risky(ReviewSubject::Listing, listing_id, &score, now)
            .await;
        Ok(score)
    }

    /// Score a transaction and queue it when the risk is high
    pub async fn assess_transaction(
        &self,
        transaction_id: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<FraudScore> {
        let transaction = self
            .store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("transaction {}", transaction_id)))?;

        let listing = self.store.get_listing(transaction.listing_id).await?;
        let buyer = self.store.get_profile(transaction.buyer_id).await?;
        let seller = self.store.get_profile(transaction.seller_id).await?;

        let score = score_transaction(
            &transaction,
            listing.as_ref(),
            buyer.as_ref(),
            seller.as_ref(),
            now,
        );
        self.queue_if_risky(ReviewSubject::Transaction, transaction_id, &score, now)
            .await;
        Ok(score)
    }

    pub async fn list_reviews(&self, limit: i64, offset: i64) -> ServiceResult<Vec<FraudReview>> {
        Ok(self.store.list_fraud_reviews(limit, offset).await?)
    }

    /// Queue failures are logged; the score is still returned
    async fn queue_if_risky(
        &self,
        subject_kind: ReviewSubject,
        subject_id: i64,
        score: &FraudScore,
        now: DateTime<Utc>,
    ) {
        if !score.risk.needs_review() {
            return;
        }

        let review = NewFraudReview {
            subject_kind,
            subject_id,
            score: score.clone(),
            now,
        };
        match self.store.upsert_fraud_review(review).await {
            Ok(_) => info!(
                subject = ?subject_kind,
                subject_id,
                score = score.score,
                risk = ?score.risk,
                "Queued for fraud review"
            ),
            Err(e) => warn!(
                subject = ?subject_kind,
                subject_id,
                error = %e,
                "Failed to queue fraud review"
            ),
        }
    }
}
