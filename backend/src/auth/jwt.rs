//! JWT token generation and validation
//!
//! Access tokens are issued by the account service; this backend verifies them
//! with the shared secret and reads the user id and role.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::UserRole;

/// JWT-related errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User role
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Signing secret shared with the account service
#[derive(Clone)]
pub struct JwtSecret(pub std::sync::Arc<str>);

impl JwtSecret {
    pub fn new(secret: &str) -> Self {
        Self(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Generate an access token
///
/// # Arguments
/// * `user_id` - The authenticated user
/// * `role` - Role carried in the token
/// * `secret` - JWT signing secret
/// * `ttl_seconds` - Token time-to-live in seconds
pub fn generate_access_token(
    user_id: Uuid,
    role: UserRole,
    secret: &str,
    ttl_seconds: i64,
) -> Result<String, JwtError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(ttl_seconds);

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::EncodingFailed(e.to_string()))
}

/// Verify and decode a JWT token
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        _ => JwtError::DecodingFailed(e.to_string()),
    })?;

    Ok(token_data.claims)
}

/// Extract user ID and role from claims
pub fn identity_from_claims(claims: &Claims) -> Result<(Uuid, UserRole), JwtError> {
    let user_id = Uuid::parse_str(&claims.sub).map_err(|e| JwtError::InvalidToken(e.to_string()))?;
    let role = UserRole::parse(&claims.role)
        .ok_or_else(|| JwtError::InvalidToken(format!("unknown role '{}'", claims.role)))?;
    Ok((user_id, role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_verify() {
        let user_id = Uuid::new_v4();
        let token = generate_access_token(user_id, UserRole::Admin, "test-secret-key", 900).unwrap();
        assert!(!token.is_empty());

        let claims = verify_token(&token, "test-secret-key").unwrap();
        let (id, role) = identity_from_claims(&claims).unwrap();
        assert_eq!(id, user_id);
        assert_eq!(role, UserRole::Admin);
    }

    #[test]
    fn test_invalid_token() {
        let result = verify_token("invalid.token.here", "test-secret-key");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let token = generate_access_token(Uuid::new_v4(), UserRole::User, "secret1", 900).unwrap();
        assert!(verify_token(&token, "secret2").is_err());
    }

    #[test]
    fn test_expired_token() {
        // Well past the default 60s leeway
        let token = generate_access_token(Uuid::new_v4(), UserRole::User, "s", -600).unwrap();
        assert!(matches!(verify_token(&token, "s"), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: "superuser".to_string(),
            iat: 0,
            exp: 0,
        };
        assert!(identity_from_claims(&claims).is_err());
    }
}
