//! Centralized error handling for PassVault
//!
//! `ServiceError` is the domain taxonomy returned by every lifecycle, dispute,
//! approval and chat operation. `ApiError` is the HTTP surface: it maps each
//! domain error to a status code and a JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Domain error taxonomy for the escrow core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Operation is illegal in the current lifecycle phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller lacks the required relationship to the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate active record (payment, dispute, approval)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Automatic release attempted before the escrow deadline
    #[error("Too early: {0}")]
    TooEarly(String),

    /// The transaction was already completed by another path
    #[error("Transaction {0} is already completed")]
    AlreadyCompleted(i64),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Could not generate a unique protocol number after {0} attempts")]
    ProtocolGenerationFailed(u32),

    /// Payer lacks an identity credential the gateway needs
    #[error("Missing identity: {0}")]
    MissingIdentity(String),

    /// The resource existed but has expired
    #[error("Gone: {0}")]
    Gone(String),

    #[error("Required: {0}")]
    Required(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::UniqueViolation(constraint) => {
                ServiceError::Conflict(format!("duplicate record ({})", constraint))
            }
            StoreError::Database(msg) => ServiceError::Store(msg),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Domain error surfaced verbatim with its own code
    #[error("{0}")]
    Domain(ServiceError),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ServiceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::InvalidState(_) => "INVALID_STATE",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::TooEarly(_) => "TOO_EARLY",
            ServiceError::AlreadyCompleted(_) => "ALREADY_COMPLETED",
            ServiceError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            ServiceError::ProtocolGenerationFailed(_) => "PROTOCOL_GENERATION_FAILED",
            ServiceError::MissingIdentity(_) => "MISSING_IDENTITY",
            ServiceError::Gone(_) => "GONE",
            ServiceError::Required(_) => "REQUIRED",
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Store(_) => "DATABASE_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidState(_)
            | ServiceError::Conflict(_)
            | ServiceError::AlreadyCompleted(_) => StatusCode::CONFLICT,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::TooEarly(_)
            | ServiceError::Required(_)
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::ProtocolGenerationFailed(_) | ServiceError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::MissingIdentity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Gone(_) => StatusCode::GONE,
        }
    }
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Gone(_) => "GONE",
            ApiError::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
            ApiError::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Domain(err) => err.error_code(),
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => err.status_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Domain(err.into())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;
