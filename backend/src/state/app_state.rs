//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::JwtSecret;
use crate::chat::ChatGuard;
use crate::dispute::DisputeService;
use crate::services::FraudReviewService;
use crate::transaction::TransactionService;
use crate::vendor_approval::VendorApprovalService;
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub transaction_service: Arc<TransactionService>,
    pub dispute_service: Arc<DisputeService>,
    pub approval_service: Arc<VendorApprovalService>,
    pub fraud_service: Arc<FraudReviewService>,
    pub chat_guard: Arc<ChatGuard>,
    pub ws_state: WsState,
    pub jwt_secret: JwtSecret,
    /// Shared secret the payment gateway sends in `X-Webhook-Secret`
    pub webhook_secret: Option<String>,
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for JwtSecret {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.jwt_secret.clone()
    }
}

impl FromRef<AppState> for Arc<TransactionService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.transaction_service.clone()
    }
}

impl FromRef<AppState> for Arc<DisputeService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.dispute_service.clone()
    }
}

impl FromRef<AppState> for Arc<VendorApprovalService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.approval_service.clone()
    }
}

impl FromRef<AppState> for Arc<FraudReviewService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.fraud_service.clone()
    }
}

impl FromRef<AppState> for Arc<ChatGuard> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.chat_guard.clone()
    }
}
