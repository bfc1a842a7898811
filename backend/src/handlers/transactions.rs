//! Transaction lifecycle API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;

use crate::error::ApiError;
use crate::middleware::{client_ip, AdminUser, AuthenticatedUser};
use crate::models::ApiResponse;
use crate::services::FraudReviewService;
use crate::transaction::{
    CancelTransactionRequest, CreatePaymentRequest, CreatePaymentResponse,
    CreateTransactionRequest, ListTransactionsQuery, Payment, ReceiptActor,
    SettleTransactionRequest, Transaction, TransactionService,
};

/// POST /api/transactions - Create a transaction from an accepted offer
pub async fn create_transaction(
    State(service): State<Arc<TransactionService>>,
    State(fraud): State<Arc<FraudReviewService>>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Transaction>>), ApiError> {
    let now = Utc::now();
    let tx = service
        .create_transaction(user.user_id, request, client_ip(&headers), now)
        .await?;

    // Scoring is advisory and must not fail the request
    if let Err(e) = fraud.assess_transaction(tx.id, now).await {
        tracing::warn!(transaction_id = tx.id, error = %e, "Fraud assessment failed");
    }

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(tx))))
}

/// GET /api/transactions/:id
pub async fn get_transaction(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let tx = service
        .get_transaction(id, user.user_id, user.is_staff())
        .await?;
    Ok(Json(ApiResponse::ok(tx)))
}

/// GET /api/transactions - The caller's transactions, newest first
pub async fn list_transactions(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ApiResponse<Vec<Transaction>>>, ApiError> {
    let rows = service.list_transactions(user.user_id, query).await?;
    Ok(Json(ApiResponse::ok(rows)))
}

/// GET /api/transactions/:id/payments
pub async fn list_payments(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<Payment>>>, ApiError> {
    service
        .get_transaction(id, user.user_id, user.is_staff())
        .await?;
    let payments = service.list_payments(id).await?;
    Ok(Json(ApiResponse::ok(payments)))
}

/// POST /api/transactions/:id/payment
pub async fn create_payment(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatePaymentResponse>>), ApiError> {
    let response = service
        .create_payment(id, user.user_id, request.method)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}

/// POST /api/transactions/:id/transfer
pub async fn mark_transferred(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let tx = service.mark_transferred(id, user.user_id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(tx)))
}

/// POST /api/transactions/:id/confirm-receipt
pub async fn confirm_receipt(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let tx = service
        .confirm_receipt(id, ReceiptActor::Buyer(user.user_id), Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(tx)))
}

/// POST /api/transactions/:id/cancel
pub async fn cancel_transaction(
    State(service): State<Arc<TransactionService>>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(request): Json<CancelTransactionRequest>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let tx = service.cancel(id, user.user_id, request, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(tx)))
}

/// POST /api/transactions/:id/settle - Admin decision after disputes
pub async fn settle_transaction(
    State(service): State<Arc<TransactionService>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Json(request): Json<SettleTransactionRequest>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let tx = service.settle(id, admin.user_id, request, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(tx)))
}

/// POST /api/transactions/:id/refund - Admin refund of a funded transaction
pub async fn refund_transaction(
    State(service): State<Arc<TransactionService>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Transaction>>, ApiError> {
    let tx = service.refund(id, admin.user_id, Utc::now()).await?;
    Ok(Json(ApiResponse::ok(tx)))
}
