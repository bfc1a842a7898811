//! Fraud review queue tests

mod common;

use chrono::Duration;

use common::{listing, newcomer, t0, Harness, LISTING_ID};
use passvault_server::services::{FraudReviewService, ReviewSubject, RiskLevel};

#[tokio::test]
async fn test_risky_listing_is_queued() {
    let h = Harness::new().await;
    let service = FraudReviewService::new(h.store.clone());

    let seller = uuid::Uuid::new_v4();
    h.memory.seed_profile(newcomer(seller)).await;
    let mut risky = listing(2, seller);
    risky.title = "Cheap festival pass".to_string();
    risky.description = "Need gone today".to_string();
    risky.asking_price = 200;
    risky.original_price = Some(1_000);
    risky.image_hashes = Vec::new();
    risky.event_date = Some(t0() - Duration::days(2));
    h.memory.seed_listing(risky).await;

    let score = service.assess_listing(2, t0()).await.unwrap();
    assert!(score.risk >= RiskLevel::High);

    let safe = service.assess_listing(LISTING_ID, t0()).await.unwrap();
    assert_eq!(safe.risk, RiskLevel::Low);

    let queue = service.list_reviews(20, 0).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].subject_kind, ReviewSubject::Listing);
    assert_eq!(queue[0].subject_id, 2);
    assert_eq!(queue[0].score, score.score);

    // Re-scoring updates the existing entry
    service.assess_listing(2, t0() + Duration::hours(1)).await.unwrap();
    assert_eq!(service.list_reviews(20, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ordinary_transaction_is_not_queued() {
    let h = Harness::new().await;
    let service = FraudReviewService::new(h.store.clone());
    let tx = h.create(1_000).await;

    let score = service.assess_transaction(tx.id, t0()).await.unwrap();
    assert_eq!(score.risk, RiskLevel::Low);
    assert!(service.list_reviews(20, 0).await.unwrap().is_empty());
}
