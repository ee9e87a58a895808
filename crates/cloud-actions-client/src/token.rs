//! Token lifecycle: mint, reuse, refresh or re-issue the credential.

use std::sync::Arc;

use cloud_actions_core::{
    CREDENTIAL_STORE_KEY, Credential, SessionState, TokenClaims,
    claims::{self, ClaimsError},
    traits::{HttpTransport, KeyValueStore, StoreError, TransportError},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{config::ClientConfig, session::SessionPublisher, urls};

/// Safety margin: a token expiring within this window counts as expired.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Locally signed service tokens carry a fixed two-day lifetime.
const SERVICE_TOKEN_TTL_SECS: i64 = 2 * 24 * 60 * 60;

/// Token lifecycle error.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Credential endpoint response unusable: {0}")]
    MalformedResponse(String),
    #[error("Service credential signing failed: {0}")]
    Signing(String),
    #[error("Claims error: {0}")]
    Claims(#[from] ClaimsError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceClaims {
    project_id: String,
    identity: String,
    iat: i64,
    exp: i64,
}

/// Produces a credential guaranteed non-expired at the moment of use.
///
/// Only ever driven from the dispatch worker, which serializes token
/// resolution; the stored credential needs no finer-grained locking.
#[derive(Clone)]
pub struct TokenManager {
    config: Arc<ClientConfig>,
    store: Arc<dyn KeyValueStore>,
    http: Arc<dyn HttpTransport>,
    session: SessionPublisher,
}

impl TokenManager {
    #[must_use]
    pub fn new(
        config: Arc<ClientConfig>,
        store: Arc<dyn KeyValueStore>,
        http: Arc<dyn HttpTransport>,
        session: SessionPublisher,
    ) -> Self {
        Self {
            config,
            store,
            http,
            session,
        }
    }

    /// Resolve the credential for the next dispatch, in priority order:
    /// locally signed service credential, stored credential as-is, refresh,
    /// fresh anonymous issuance. Any newly obtained credential is persisted
    /// before it is returned.
    ///
    /// # Errors
    /// Propagates network failures; a failed refresh additionally clears
    /// the stored credential and publishes `SignedOut`.
    pub async fn resolve(&self) -> Result<Credential, TokenError> {
        if self.config.has_service_identity() {
            return self.sign_service_credential();
        }

        let safe_now = claims::unix_now() + EXPIRY_MARGIN_SECS;

        if let Some(stored) = self.read_stored().await? {
            if stored.access_token_valid_at(safe_now) && stored.refresh_token_valid_at(safe_now) {
                return Ok(stored);
            }

            if stored.refresh_token_valid_at(safe_now) {
                return match self.request_refresh(&stored.refresh_token).await {
                    Ok(fresh) => {
                        self.persist(&fresh).await?;
                        Ok(fresh)
                    }
                    Err(e) => {
                        tracing::warn!("Refresh failed, signing out: {e}");
                        self.sign_out().await?;
                        Err(TokenError::RefreshFailed(e.to_string()))
                    }
                };
            }
            // Refresh token expired as well: discard and fall through.
        }

        let fresh = self.request_anonymous().await?;
        self.persist(&fresh).await?;
        Ok(fresh)
    }

    /// Exchange a custom token for a credential and persist it.
    ///
    /// # Errors
    /// Propagates transport failures; the stored credential is untouched
    /// on failure.
    pub async fn exchange_custom_token(&self, custom_token: &str) -> Result<Credential, TokenError> {
        let url = urls::custom_auth_url(&self.config, custom_token)?;
        let response = self.http.get(&url).await?;
        let credential = credential_from_response(&response)?;
        self.persist(&credential).await?;
        Ok(credential)
    }

    /// Clear the stored credential and publish `SignedOut`. Idempotent.
    ///
    /// # Errors
    /// Returns a store error if the removal fails.
    pub async fn sign_out(&self) -> Result<(), TokenError> {
        self.store.remove(CREDENTIAL_STORE_KEY).await?;
        self.session.publish(SessionState::signed_out());
        Ok(())
    }

    /// Claims of the currently stored credential, if any.
    ///
    /// # Errors
    /// Returns a store error if the read fails.
    pub async fn current_claims(&self) -> Result<Option<TokenClaims>, TokenError> {
        Ok(self.read_stored().await?.and_then(|c| c.claims()))
    }

    /// Session state derived from the currently stored credential.
    ///
    /// # Errors
    /// Returns a store error if the read fails.
    pub async fn current_state(&self) -> Result<SessionState, TokenError> {
        Ok(SessionState::from_credential(
            self.read_stored().await?.as_ref(),
        ))
    }

    async fn read_stored(&self) -> Result<Option<Credential>, TokenError> {
        let Some(raw) = self.store.get(CREDENTIAL_STORE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // A corrupt entry is discarded rather than wedging every
                // dispatch; the next resolution falls through to anonymous.
                tracing::warn!("Discarding unreadable stored credential: {e}");
                self.store.remove(CREDENTIAL_STORE_KEY).await?;
                Ok(None)
            }
        }
    }

    async fn persist(&self, credential: &Credential) -> Result<(), TokenError> {
        if credential.is_service_credential {
            return Ok(());
        }
        let raw = serde_json::to_string(credential)
            .map_err(|e| TokenError::MalformedResponse(e.to_string()))?;
        self.store.set(CREDENTIAL_STORE_KEY, &raw).await?;
        Ok(())
    }

    fn sign_service_credential(&self) -> Result<Credential, TokenError> {
        let secret = self
            .config
            .secret_key
            .as_deref()
            .ok_or_else(|| TokenError::Signing("secret key missing".into()))?;
        let service_id = self
            .config
            .service_id
            .as_deref()
            .ok_or_else(|| TokenError::Signing("service id missing".into()))?;
        let developer_id = self.config.developer_id.as_deref().unwrap_or_default();

        let now = claims::unix_now();
        let claims = ServiceClaims {
            project_id: self.config.project_id.clone(),
            identity: format!("{developer_id}.{service_id}"),
            iat: now,
            exp: now + SERVICE_TOKEN_TTL_SECS,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(Credential::service(token))
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<Credential, TokenError> {
        let url = urls::refresh_url(&self.config, refresh_token)?;
        let response = self.http.get(&url).await?;
        credential_from_response(&response)
    }

    async fn request_anonymous(&self) -> Result<Credential, TokenError> {
        let url = urls::anonymous_auth_url(&self.config)?;
        let response = self.http.get(&url).await?;
        credential_from_response(&response)
    }
}

fn credential_from_response(response: &Value) -> Result<Credential, TokenError> {
    let access_token = response
        .get("accessToken")
        .and_then(Value::as_str)
        .ok_or_else(|| TokenError::MalformedResponse("missing accessToken".into()))?;
    let refresh_token = response
        .get("refreshToken")
        .and_then(Value::as_str)
        .ok_or_else(|| TokenError::MalformedResponse("missing refreshToken".into()))?;
    Ok(Credential::from_tokens(
        access_token.to_string(),
        refresh_token.to_string(),
    ))
}
