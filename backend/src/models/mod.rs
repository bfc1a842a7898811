//! Shared data models for PassVault backend
//!
//! Listings and user profiles are owned by the marketplace side of the platform;
//! the escrow core only reads them.

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// User roles carried in access tokens
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Support,
    Admin,
}

impl UserRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(UserRole::User),
            "support" => Some(UserRole::Support),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Support => "support",
            UserRole::Admin => "admin",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Support | UserRole::Admin)
    }
}

/// Identity and reputation attributes used by payments and fraud scoring
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub account_created_at: Option<DateTime<Utc>>,
    /// 0 = none, 1 = email, 2 = document, 3 = document + liveness
    pub verification_level: i16,
    pub completed_transactions: i64,
    /// National tax id, required by some payment methods
    pub tax_id: Option<String>,
}

impl UserProfile {
    pub fn is_identity_verified(&self) -> bool {
        self.verification_level >= 2
    }
}

/// Listing status as seen by the escrow core
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "listing_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Reserved,
    Sold,
    Withdrawn,
}

/// A reservation offered for resale
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Listing {
    pub id: i64,
    pub seller_id: Uuid,
    pub category: String,
    pub title: String,
    pub description: String,
    pub asking_price: i64,
    /// Face value paid for the reservation, when the seller supplied it
    pub original_price: Option<i64>,
    /// Perceptual hashes of the listing images
    pub image_hashes: Vec<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub status: ListingStatus,
    pub seller_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Pagination parameters
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct PaginationParams {
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

impl PaginationParams {
    /// Returns (limit, offset) clamped to sane bounds
    pub fn limit_offset(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (limit as i64, ((page - 1) * limit) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_clamps() {
        let p = PaginationParams {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(p.limit_offset(), (100, 0));

        let p = PaginationParams {
            page: Some(3),
            limit: Some(10),
        };
        assert_eq!(p.limit_offset(), (10, 20));
    }

    #[test]
    fn test_identity_verified_threshold() {
        let mut profile = UserProfile {
            id: Uuid::new_v4(),
            account_created_at: None,
            verification_level: 1,
            completed_transactions: 0,
            tax_id: None,
        };
        assert!(!profile.is_identity_verified());
        profile.verification_level = 2;
        assert!(profile.is_identity_verified());
    }
}
