//! Unsigned token claims decoding.
//!
//! Claims are decoded without verifying the signature. On the client they are
//! informational only (subject id, expiry, anonymity flag); the server is the
//! sole authority on token validity. Do not add signature verification here -
//! a client-side check could silently diverge from what the server accepts.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims decoding error.
#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("Malformed token: {0}")]
    Malformed(String),
}

/// Claims carried by an access or refresh token.
///
/// Field names follow the wire format (`userId`, `projectId`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenClaims {
    /// Subject id the token is bound to.
    pub user_id: Option<String>,
    /// Identity string (`{developerId}.{serviceId}` for service tokens,
    /// role identity otherwise).
    pub identity: Option<String>,
    /// Project the token was issued for.
    pub project_id: Option<String>,
    /// Issuing service, if any.
    pub service_id: Option<String>,
    /// True for tokens issued without prior authentication.
    pub anonymous: bool,
    /// Issued-at, Unix seconds.
    pub iat: Option<i64>,
    /// Expiry, Unix seconds.
    pub exp: Option<i64>,
}

/// Decode a token's claims without verifying its signature.
///
/// # Errors
/// Returns `ClaimsError::Malformed` if the token is not a well-formed JWT.
pub fn decode_claims(token: &str) -> Result<TokenClaims, ClaimsError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| ClaimsError::Malformed(e.to_string()))
}

/// Expiry claim of `token` in Unix seconds, or `0` when absent or undecodable.
#[must_use]
pub fn expires_at(token: &str) -> i64 {
    decode_claims(token).ok().and_then(|c| c.exp).unwrap_or(0)
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
