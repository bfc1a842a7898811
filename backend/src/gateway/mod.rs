//! Payment gateway adapter
//!
//! The escrow core only sees this trait. Every call is bounded by a timeout;
//! a call that exceeds it is reported as failed, never left hanging.

pub mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::transaction::{GatewayPaymentStatus, PaymentInstructions, PaymentMethod};

pub use http::HttpPaymentGateway;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered but refused the request
    #[error("gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::GatewayUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    /// Transaction code, used by the gateway for idempotency
    pub reference: String,
    pub payer_id: Uuid,
    pub payer_tax_id: Option<String>,
    pub amount: i64,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChargeResponse {
    pub gateway_id: String,
    pub instructions: PaymentInstructions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutRequest {
    pub reference: String,
    pub payee_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PayoutResponse {
    pub gateway_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeResponse>;

    async fn create_payout(&self, request: PayoutRequest) -> GatewayResult<PayoutResponse>;

    async fn get_status(&self, gateway_id: &str) -> GatewayResult<GatewayPaymentStatus>;
}

/// Run a gateway future with a hard deadline
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: GatewayResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result() {
        let result = with_timeout(Duration::from_secs(1), async {
            Ok::<_, GatewayError>(7)
        })
        .await;
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_gateway_error_maps_to_unavailable() {
        let err: ServiceError = GatewayError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(err, ServiceError::GatewayUnavailable(_)));
    }
}
