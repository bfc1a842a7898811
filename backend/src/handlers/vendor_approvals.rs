//! Vendor approval API handlers
//!
//! The `:token` routes are public; the token in the path is the credential.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;

use crate::error::ApiError;
use crate::middleware::{client_ip, AuthenticatedUser};
use crate::models::ApiResponse;
use crate::vendor_approval::{
    ApprovalView, RequestApprovalRequest, RequestApprovalResponse, RespondApprovalRequest,
    VendorApproval, VendorApprovalService,
};

/// POST /api/transactions/:id/vendor-approvals
pub async fn request_approval(
    State(service): State<Arc<VendorApprovalService>>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<i64>,
    Json(request): Json<RequestApprovalRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RequestApprovalResponse>>), ApiError> {
    let response = service
        .request_approval(transaction_id, user.user_id, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}

/// GET /api/transactions/:id/vendor-approvals
pub async fn list_approvals(
    State(service): State<Arc<VendorApprovalService>>,
    user: AuthenticatedUser,
    Path(transaction_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<VendorApproval>>>, ApiError> {
    let approvals = service
        .list_for_transaction(transaction_id, user.user_id, user.is_staff())
        .await?;
    Ok(Json(ApiResponse::ok(approvals)))
}

/// GET /api/vendor-approvals/:token
pub async fn view_approval(
    State(service): State<Arc<VendorApprovalService>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<ApprovalView>>, ApiError> {
    let view = service.view(&token, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// POST /api/vendor-approvals/:token/respond
pub async fn respond_approval(
    State(service): State<Arc<VendorApprovalService>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RespondApprovalRequest>,
) -> Result<Json<ApiResponse<ApprovalView>>, ApiError> {
    let approval = service
        .respond(&token, request, client_ip(&headers), Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(ApprovalView::from(&approval))))
}
