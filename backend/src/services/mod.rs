//! Fraud scoring and review services

pub mod fraud_review;
pub mod fraud_scorer;

pub use fraud_review::{FraudReview, FraudReviewService, NewFraudReview, ReviewSubject};
pub use fraud_scorer::{score_listing, score_transaction, FraudScore, FraudSignal, RiskLevel};
