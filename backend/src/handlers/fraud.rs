//! Fraud scoring API handlers (staff only)

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;

use crate::error::ApiError;
use crate::middleware::AdminUser;
use crate::models::{ApiResponse, PaginationParams};
use crate::services::{FraudReview, FraudReviewService, FraudScore};

/// GET /api/fraud/listings/:id
pub async fn score_listing(
    State(service): State<Arc<FraudReviewService>>,
    _admin: AdminUser,
    Path(listing_id): Path<i64>,
) -> Result<Json<ApiResponse<FraudScore>>, ApiError> {
    let score = service.assess_listing(listing_id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(score)))
}

/// GET /api/fraud/transactions/:id
pub async fn score_transaction(
    State(service): State<Arc<FraudReviewService>>,
    _admin: AdminUser,
    Path(transaction_id): Path<i64>,
) -> Result<Json<ApiResponse<FraudScore>>, ApiError> {
    let score = service.assess_transaction(transaction_id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(score)))
}

/// GET /api/fraud/reviews - The review queue, highest score first
pub async fn list_reviews(
    State(service): State<Arc<FraudReviewService>>,
    _admin: AdminUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<Vec<FraudReview>>>, ApiError> {
    let (limit, offset) = pagination.limit_offset();
    let reviews = service.list_reviews(limit, offset).await?;
    Ok(Json(ApiResponse::ok(reviews)))
}
