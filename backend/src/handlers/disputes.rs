//! Dispute API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::dispute::{Dispute, DisputeService, OpenDisputeRequest, ResolveDisputeRequest};
use crate::error::ApiError;
use crate::middleware::{AdminUser, AuthenticatedUser};
use crate::models::ApiResponse;

/// POST /api/transactions/:id/disputes
pub async fn open_dispute(
    State(service): State<Arc<DisputeService>>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<i64>,
    Json(request): Json<OpenDisputeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Dispute>>), ApiError> {
    let dispute = service
        .open_dispute(transaction_id, user.user_id, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(dispute))))
}

/// GET /api/transactions/:id/disputes
pub async fn list_disputes(
    State(service): State<Arc<DisputeService>>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<Dispute>>>, ApiError> {
    let disputes = service
        .list_disputes(transaction_id, user.user_id, user.is_staff())
        .await?;
    Ok(Json(ApiResponse::ok(disputes)))
}

/// POST /api/disputes/:id/review
pub async fn start_review(
    State(service): State<Arc<DisputeService>>,
    AdminUser(admin): AdminUser,
    Path(dispute_id): Path<i64>,
) -> Result<Json<ApiResponse<Dispute>>, ApiError> {
    let dispute = service
        .start_review(dispute_id, admin.user_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(dispute)))
}

/// POST /api/disputes/:id/resolve
pub async fn resolve_dispute(
    State(service): State<Arc<DisputeService>>,
    AdminUser(admin): AdminUser,
    Path(dispute_id): Path<i64>,
    Json(request): Json<ResolveDisputeRequest>,
) -> Result<Json<ApiResponse<Dispute>>, ApiError> {
    let dispute = service
        .resolve_dispute(dispute_id, admin.user_id, request, Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(dispute)))
}
