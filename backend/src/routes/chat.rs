//! Chat route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers::chat::{check_message, my_violations, reset_violations};
use crate::state::AppState;

pub fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/api/chat/messages/check", post(check_message))
        .route("/api/chat/violations/me", get(my_violations))
        .route("/api/chat/violations/:user_id", delete(reset_violations))
}
