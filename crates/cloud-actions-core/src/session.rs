//! Coarse-grained authentication status derived from the current credential.

use serde::{Deserialize, Serialize};

use crate::credential::Credential;

/// Authentication status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    SignedOut,
    SignedInAnonym,
    SignedIn,
    AuthFailed,
}

/// A point-in-time session state.
///
/// Always recomputed from the current credential (or its absence), never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub user_id: Option<String>,
    pub identity: Option<String>,
    pub message: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn signed_out() -> Self {
        Self {
            status: SessionStatus::SignedOut,
            user_id: None,
            identity: None,
            message: None,
        }
    }

    #[must_use]
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::AuthFailed,
            user_id: None,
            identity: None,
            message: Some(message.into()),
        }
    }

    /// Derive the state from a credential. An undecodable access token
    /// counts as signed out.
    #[must_use]
    pub fn from_credential(credential: Option<&Credential>) -> Self {
        let Some(claims) = credential.and_then(Credential::claims) else {
            return Self::signed_out();
        };

        let status = if claims.anonymous {
            SessionStatus::SignedInAnonym
        } else {
            SessionStatus::SignedIn
        };
        Self {
            status,
            user_id: claims.user_id,
            identity: claims.identity,
            message: None,
        }
    }

    /// Key the session stream dedups consecutive states on.
    #[must_use]
    pub fn dedup_key(&self) -> (SessionStatus, Option<&str>, Option<&str>) {
        (
            self.status,
            self.user_id.as_deref(),
            self.identity.as_deref(),
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::signed_out()
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;
    use crate::claims::TokenClaims;

    fn credential(anonymous: bool) -> Credential {
        let claims = TokenClaims {
            user_id: Some("u1".into()),
            identity: Some("enduser".into()),
            anonymous,
            exp: Some(4_000_000_000),
            ..TokenClaims::default()
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        Credential::from_tokens(token.clone(), token)
    }

    #[test]
    fn test_no_credential_is_signed_out() {
        assert_eq!(
            SessionState::from_credential(None).status,
            SessionStatus::SignedOut
        );
    }

    #[test]
    fn test_anonymous_flag_drives_status() {
        let state = SessionState::from_credential(Some(&credential(true)));
        assert_eq!(state.status, SessionStatus::SignedInAnonym);
        assert_eq!(state.user_id.as_deref(), Some("u1"));

        let state = SessionState::from_credential(Some(&credential(false)));
        assert_eq!(state.status, SessionStatus::SignedIn);
        assert_eq!(state.identity.as_deref(), Some("enduser"));
    }

    #[test]
    fn test_undecodable_token_is_signed_out() {
        let cred = Credential::from_tokens("garbage".into(), "garbage".into());
        assert_eq!(
            SessionState::from_credential(Some(&cred)).status,
            SessionStatus::SignedOut
        );
    }
}
