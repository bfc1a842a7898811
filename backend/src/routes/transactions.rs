//! Transaction route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn transaction_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/transactions",
            post(create_transaction).get(list_transactions),
        )
        .route("/api/transactions/:id", get(get_transaction))
        .route(
            "/api/transactions/:id/payment",
            post(create_payment),
        )
        .route("/api/transactions/:id/payments", get(list_payments))
        .route("/api/transactions/:id/transfer", post(mark_transferred))
        .route(
            "/api/transactions/:id/confirm-receipt",
            post(confirm_receipt),
        )
        .route("/api/transactions/:id/cancel", post(cancel_transaction))
        .route("/api/transactions/:id/settle", post(settle_transaction))
        .route("/api/transactions/:id/refund", post(refund_transaction))
}
