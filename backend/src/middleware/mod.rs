//! Middleware for the PassVault API
//!
//! Request tracing, rate limiting, security headers and authentication.

pub mod auth;
mod client_ip;
mod rate_limiter;
mod security;
mod tracing;

pub use auth::{AdminUser, AuthenticatedUser};
pub use client_ip::client_ip;
pub use rate_limiter::{rate_limit_layer, RateLimiter};
pub use security::{hsts_header, security_headers};
pub use tracing::request_tracing;
