//! Configuration management for PassVault
//!
//! This module handles loading and validating configuration from environment variables,
//! with support for different environments (development, staging, production).

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Get the environment name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Escrow lifecycle policy knobs
#[derive(Debug, Clone)]
pub struct EscrowPolicy {
    /// Platform fee in basis points (500 = 5%)
    pub platform_fee_rate_bps: i32,

    /// Days between MarkTransferred and automatic release
    pub escrow_timeout_days: i64,

    /// Hours the buyer has to pay after the transaction is created
    pub payment_deadline_hours: i64,

    /// Lifetime of a vendor approval link
    pub vendor_approval_ttl_hours: i64,

    /// Payout retries before the record is left for manual handling
    pub payout_max_attempts: i32,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            platform_fee_rate_bps: 500,
            escrow_timeout_days: 7,
            payment_deadline_hours: 24,
            vendor_approval_ttl_hours: 72,
            payout_max_attempts: 5,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Current environment
    pub environment: Environment,

    /// Server port
    pub port: u16,

    /// Maximum database connections
    pub db_max_connections: u32,

    /// Rate limit: requests per second per IP
    pub rate_limit_rps: u32,

    /// Shared secret the payment gateway sends with webhooks
    pub webhook_secret: Option<String>,

    /// CORS allowed origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// JWT secret for token verification
    pub jwt_secret: String,

    /// Payment gateway base URL
    pub payment_gateway_url: String,

    /// Payment gateway API key
    pub payment_gateway_api_key: String,

    /// Per-call timeout for gateway requests
    pub gateway_timeout_secs: u64,

    /// Where notifications are POSTed; log-only when unset
    pub notification_webhook_url: Option<String>,

    /// Escrow sweep interval in seconds
    pub escrow_sweep_interval_secs: u64,

    pub escrow: EscrowPolicy,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "development-secret-change-in-production".to_string());

        if environment.is_production() && jwt_secret.starts_with("development-") {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET must be set in production".to_string(),
            ));
        }

        let defaults = EscrowPolicy::default();
        let escrow = EscrowPolicy {
            platform_fee_rate_bps: parse_or("PLATFORM_FEE_RATE_BPS", defaults.platform_fee_rate_bps),
            escrow_timeout_days: parse_or("ESCROW_TIMEOUT_DAYS", defaults.escrow_timeout_days),
            payment_deadline_hours: parse_or(
                "PAYMENT_DEADLINE_HOURS",
                defaults.payment_deadline_hours,
            ),
            vendor_approval_ttl_hours: parse_or(
                "VENDOR_APPROVAL_TTL_HOURS",
                defaults.vendor_approval_ttl_hours,
            ),
            payout_max_attempts: parse_or("PAYOUT_MAX_ATTEMPTS", defaults.payout_max_attempts),
        };

        if !(0..10_000).contains(&escrow.platform_fee_rate_bps) {
            return Err(ConfigError::InvalidValue(format!(
                "PLATFORM_FEE_RATE_BPS out of range: {}",
                escrow.platform_fee_rate_bps
            )));
        }

        Ok(Config {
            database_url,
            environment,
            port,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5),
            rate_limit_rps: parse_or("RATE_LIMIT_RPS", 100),
            webhook_secret: env::var("WEBHOOK_SECRET").ok(),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            jwt_secret,
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:4010".to_string()),
            payment_gateway_api_key: env::var("PAYMENT_GATEWAY_API_KEY").unwrap_or_default(),
            gateway_timeout_secs: parse_or("GATEWAY_TIMEOUT_SECS", 10),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL").ok(),
            escrow_sweep_interval_secs: parse_or("ESCROW_SWEEP_INTERVAL_SECS", 60),
            escrow,
        })
    }

    /// Get database URL (useful for logging masked version)
    pub fn database_url_masked(&self) -> String {
        // Mask password in database URL for logging
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let prefix = &self.database_url[..colon_pos + 1];
                let suffix = &self.database_url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.database_url.clone()
    }
}
