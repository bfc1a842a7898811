//! Vendor approval models

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "approval_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    /// Pending and approved records block a new request on the same transaction
    pub fn blocks_new_request(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Approved)
    }
}

/// Third-party sign-off on a reservation transfer
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct VendorApproval {
    pub id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    pub transaction_id: i64,
    pub listing_id: i64,
    pub requested_by: Uuid,
    pub vendor_name: String,
    pub vendor_email: String,
    pub vendor_phone: Option<String>,
    pub status: ApprovalStatus,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responder_ip: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VendorApproval {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct NewVendorApproval {
    pub token: String,
    pub transaction_id: i64,
    pub listing_id: i64,
    pub requested_by: Uuid,
    pub vendor_name: String,
    pub vendor_email: String,
    pub vendor_phone: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Columns written when a vendor responds
#[derive(Debug, Clone, Default)]
pub struct ApprovalPatch {
    pub responded_at: Option<DateTime<Utc>>,
    pub responder_ip: Option<String>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RequestApprovalRequest {
    #[validate(length(min = 1, max = 200))]
    pub vendor_name: String,
    #[validate(email)]
    pub vendor_email: String,
    #[validate(length(max = 40))]
    pub vendor_phone: Option<String>,
}

/// Returned to the seller once; the token is only ever sent to the vendor
#[derive(Debug, Serialize)]
pub struct RequestApprovalResponse {
    pub approval: VendorApproval,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct RespondApprovalRequest {
    pub action: ApprovalAction,
    pub reason: Option<String>,
}

/// Public view shown on the vendor's approval page
#[derive(Debug, Serialize)]
pub struct ApprovalView {
    pub transaction_id: i64,
    pub listing_id: i64,
    pub vendor_name: String,
    pub status: ApprovalStatus,
    pub expires_at: DateTime<Utc>,
}

impl From<&VendorApproval> for ApprovalView {
    fn from(approval: &VendorApproval) -> Self {
        Self {
            transaction_id: approval.transaction_id,
            listing_id: approval.listing_id,
            vendor_name: approval.vendor_name.clone(),
            status: approval.status,
            expires_at: approval.expires_at,
        }
    }
}

/// 256 bits from the OS-seeded thread RNG, hex encoded
pub fn generate_approval_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
