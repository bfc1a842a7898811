//! Authentication module for PassVault
//!
//! Bearer JWT verification. Token issuance belongs to the account service.

mod jwt;

pub use jwt::{generate_access_token, identity_from_claims, verify_token, Claims, JwtError, JwtSecret};
