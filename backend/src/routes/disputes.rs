//! Dispute route definitions

use axum::{routing::post, Router};

use crate::handlers::disputes::{list_disputes, open_dispute, resolve_dispute, start_review};
use crate::state::AppState;

pub fn dispute_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/transactions/:id/disputes",
            post(open_dispute).get(list_disputes),
        )
        .route("/api/disputes/:id/review", post(start_review))
        .route("/api/disputes/:id/resolve", post(resolve_dispute))
}
