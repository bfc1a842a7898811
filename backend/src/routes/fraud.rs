//! Fraud scoring route definitions

use axum::{routing::get, Router};

use crate::handlers::fraud::{list_reviews, score_listing, score_transaction};
use crate::state::AppState;

pub fn fraud_routes() -> Router<AppState> {
    Router::new()
        .route("/api/fraud/listings/:id", get(score_listing))
        .route("/api/fraud/transactions/:id", get(score_transaction))
        .route("/api/fraud/reviews", get(list_reviews))
}
