//! Vendor approval route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::vendor_approvals::{
    list_approvals, request_approval, respond_approval, view_approval,
};
use crate::state::AppState;

pub fn vendor_approval_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/transactions/:id/vendor-approvals",
            post(request_approval).get(list_approvals),
        )
        .route("/api/vendor-approvals/:token", get(view_approval))
        .route(
            "/api/vendor-approvals/:token/respond",
            post(respond_approval),
        )
}
