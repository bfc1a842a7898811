//! Dispute models

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "dispute_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    ResolvedBuyer,
    ResolvedSeller,
    Closed,
}

impl DisputeStatus {
    pub const ACTIVE: [DisputeStatus; 2] = [DisputeStatus::Open, DisputeStatus::UnderReview];

    /// Open and under-review disputes hold the transaction in DISPUTE_OPENED
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "dispute_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    NotTransferred,
    InvalidReservation,
    EventChanged,
    NotAsDescribed,
    PaymentIssue,
    Other,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Dispute {
    pub id: i64,
    pub protocol: String,
    pub transaction_id: i64,
    pub opener_id: Uuid,
    pub reason: DisputeReason,
    pub description: String,
    /// Storage references of uploaded evidence
    pub evidence: Vec<String>,
    pub status: DisputeStatus,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDispute {
    pub protocol: String,
    pub transaction_id: i64,
    pub opener_id: Uuid,
    pub reason: DisputeReason,
    pub description: String,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of the atomic dispute insert + transaction status change
#[derive(Debug, Clone)]
pub enum OpenDisputeOutcome {
    Opened(Dispute, crate::transaction::Transaction),
    /// The opener already has an open or under-review dispute on this transaction
    ActiveDisputeExists,
    /// The transaction is not in a disputable status
    InvalidState(crate::transaction::TransactionStatus),
    /// The generated protocol number is already in use
    ProtocolTaken,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OpenDisputeRequest {
    pub reason: DisputeReason,
    #[validate(length(min = 10, max = 5000))]
    pub description: String,
    #[validate(length(max = 20))]
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Terminal outcome chosen by an administrator
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeResolution {
    ResolvedBuyer,
    ResolvedSeller,
    Closed,
}

impl From<DisputeResolution> for DisputeStatus {
    fn from(resolution: DisputeResolution) -> Self {
        match resolution {
            DisputeResolution::ResolvedBuyer => DisputeStatus::ResolvedBuyer,
            DisputeResolution::ResolvedSeller => DisputeStatus::ResolvedSeller,
            DisputeResolution::Closed => DisputeStatus::Closed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveDisputeRequest {
    pub resolution: DisputeResolution,
    pub notes: Option<String>,
}

/// Protocol numbers look like `DSP-20261019-482913`
pub fn generate_protocol(now: DateTime<Utc>) -> String {
    let serial: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("DSP-{}-{:06}", now.format("%Y%m%d"), serial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_protocol_format() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let protocol = generate_protocol(now);
        assert!(protocol.starts_with("DSP-20261019-"));
        assert_eq!(protocol.len(), "DSP-20261019-000000".len());
    }

    #[test]
    fn test_active_statuses() {
        assert!(DisputeStatus::Open.is_active());
        assert!(DisputeStatus::UnderReview.is_active());
        assert!(!DisputeStatus::ResolvedBuyer.is_active());
        assert!(!DisputeStatus::ResolvedSeller.is_active());
        assert!(!DisputeStatus::Closed.is_active());
    }
}
