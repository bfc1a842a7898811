//! Route definitions for the PassVault API

mod chat;
mod disputes;
mod fraud;
mod payments;
mod transactions;
mod vendor_approvals;

pub use chat::chat_routes;
pub use disputes::dispute_routes;
pub use fraud::fraud_routes;
pub use payments::payment_routes;
pub use transactions::transaction_routes;
pub use vendor_approvals::vendor_approval_routes;

use axum::Router;

use crate::state::AppState;

/// Every API route, with state still unbound
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(transaction_routes())
        .merge(payment_routes())
        .merge(dispute_routes())
        .merge(vendor_approval_routes())
        .merge(fraud_routes())
        .merge(chat_routes())
}
