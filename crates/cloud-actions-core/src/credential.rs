//! Access/refresh token pair with derived expiry.

use serde::{Deserialize, Serialize};

use crate::claims::{self, TokenClaims};

/// Fixed key the serialized credential is persisted under.
pub const CREDENTIAL_STORE_KEY: &str = "RBS_TOKENS_KEY";

/// The credential attached to every dispatched action.
///
/// Expiry fields are always derived from the corresponding token's `exp`
/// claim, never hand-set - except for the locally signed service credential,
/// whose placeholders stay `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds, from the access token's `exp` claim.
    pub access_token_expires_at: i64,
    /// Unix seconds, from the refresh token's `exp` claim.
    pub refresh_token_expires_at: i64,
    /// Locally signed service credentials are never persisted or refreshed.
    pub is_service_credential: bool,
}

impl Credential {
    /// Build a credential from a token pair, deriving expiry from the claims.
    #[must_use]
    pub fn from_tokens(access_token: String, refresh_token: String) -> Self {
        let access_token_expires_at = claims::expires_at(&access_token);
        let refresh_token_expires_at = claims::expires_at(&refresh_token);
        Self {
            access_token,
            refresh_token,
            access_token_expires_at,
            refresh_token_expires_at,
            is_service_credential: false,
        }
    }

    /// Wrap a locally signed service token. Has no refresh token.
    #[must_use]
    pub fn service(access_token: String) -> Self {
        Self {
            access_token,
            refresh_token: String::new(),
            access_token_expires_at: 0,
            refresh_token_expires_at: 0,
            is_service_credential: true,
        }
    }

    #[must_use]
    pub fn access_token_valid_at(&self, now: i64) -> bool {
        self.access_token_expires_at > now
    }

    #[must_use]
    pub fn refresh_token_valid_at(&self, now: i64) -> bool {
        self.refresh_token_expires_at > now
    }

    /// Decoded claims of the access token, if it is a well-formed JWT.
    #[must_use]
    pub fn claims(&self) -> Option<TokenClaims> {
        claims::decode_claims(&self.access_token).ok()
    }

    /// Subject id the credential is bound to.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        self.claims().and_then(|c| c.user_id)
    }
}
