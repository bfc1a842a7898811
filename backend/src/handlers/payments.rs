//! Payment gateway webhook

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::transaction::PaymentWebhookPayload;

const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

/// Compare without short-circuiting on the first differing byte
fn secrets_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// POST /api/payments/webhook - Charge and payout status from the gateway
pub async fn payment_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PaymentWebhookPayload>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    match &app_state.webhook_secret {
        Some(secret) if !secret.is_empty() => {
            let given = headers
                .get(WEBHOOK_SECRET_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();

            if !secrets_match(given, secret) {
                return Err(ApiError::Unauthorized(
                    "Unauthorized webhook request".to_string(),
                ));
            }
        }
        _ => {
            // Fail closed when no secret is configured
            tracing::error!("Webhook secret not configured - rejecting request");
            return Err(ApiError::ServiceUnavailable(
                "Webhook endpoint is not configured".to_string(),
            ));
        }
    }

    tracing::info!(gateway_id = %payload.gateway_id, status = ?payload.status, "Payment webhook received");

    app_state
        .transaction_service
        .apply_webhook(payload, Utc::now())
        .await?;

    Ok(Json(ApiResponse::ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3cre"));
        assert!(!secrets_match("s3creT", "s3cret"));
        assert!(!secrets_match("", "s3cret"));
    }
}
