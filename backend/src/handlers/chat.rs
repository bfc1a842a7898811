//! Chat send-gate API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::chat::{ChatGuard, CheckMessageRequest, SendDecision, UserViolationData};
use crate::error::ApiError;
use crate::middleware::{AdminUser, AuthenticatedUser};
use crate::models::ApiResponse;

/// POST /api/chat/messages/check - Called by the chat service before delivery
pub async fn check_message(
    State(guard): State<Arc<ChatGuard>>,
    user: AuthenticatedUser,
    Json(request): Json<CheckMessageRequest>,
) -> Result<Json<ApiResponse<SendDecision>>, ApiError> {
    let decision = guard.check_send(user.user_id, request, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(decision)))
}

/// GET /api/chat/violations/me
pub async fn my_violations(
    State(guard): State<Arc<ChatGuard>>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<UserViolationData>>, ApiError> {
    let data = guard.violations(user.user_id).await?;
    Ok(Json(ApiResponse::ok(data)))
}

/// DELETE /api/chat/violations/:user_id
pub async fn reset_violations(
    State(guard): State<Arc<ChatGuard>>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiResponse<UserViolationData>>, ApiError> {
    let data = guard.reset(user_id, admin.user_id).await?;
    Ok(Json(ApiResponse::ok(data)))
}
