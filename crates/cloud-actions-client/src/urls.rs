//! URL composition for action dispatches and token endpoints.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use cloud_actions_core::{Action, Credential, TransportError};
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;

/// base64url-encode without padding.
#[must_use]
pub fn encode_b64url(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decode base64url, tolerating padded input.
///
/// # Errors
/// Returns `TransportError::InvalidUrl` if the input is not base64url or
/// not UTF-8.
pub fn decode_b64url(encoded: &str) -> Result<String, TransportError> {
    let trimmed = encoded.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TransportError::InvalidUrl(e.to_string()))
}

fn encode_json_b64url(value: &Value) -> String {
    encode_b64url(&value.to_string())
}

/// Compose the full URL for one action dispatch.
///
/// Get-class actions use the region's read base and carry their payload in
/// the `data=` query parameter (`include_data`); other actions use the
/// write base and POST the payload as the request body. Caller headers
/// travel base64url-encoded in `headers=` so intermediaries that drop
/// unknown header names cannot lose them; POSTs additionally carry them
/// literally in `headersJson=`.
///
/// # Errors
/// Returns `TransportError::InvalidUrl` if the region base or action name
/// does not form a valid URL.
pub fn action_url(
    config: &ClientConfig,
    credential: &Credential,
    action: &Action,
    include_data: bool,
) -> Result<String, TransportError> {
    let base = if action.is_get() {
        config.region.read_base()
    } else {
        config.region.write_base()
    };
    let root = if credential.is_service_credential {
        "service"
    } else {
        "user"
    };

    let mut url = Url::parse(&format!(
        "{base}/{root}/action/{}/{}",
        config.project_id, action.name
    ))
    .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("auth", &credential.access_token);

        if let Some(target) = &action.target_service_id {
            query.append_pair("targetServiceId", target);
        }
        if let Some(related) = &action.related_user_id {
            query.append_pair("relatedUserId", related);
        }
        if let Some(headers) = &action.headers {
            let headers_json = serde_json::to_value(headers).unwrap_or(Value::Null);
            query.append_pair("headers", &encode_json_b64url(&headers_json));
            if !action.is_get() {
                query.append_pair("headersJson", &headers_json.to_string());
            }
        }
        if let Some(culture) = action.culture.as_ref().or(config.culture.as_ref()) {
            query.append_pair("culture", culture);
        }
        if let Some(platform) = &config.platform {
            query.append_pair("platform", platform);
        }
        if include_data {
            if let Some(payload) = &action.payload {
                query.append_pair("data", &encode_json_b64url(payload));
            }
        }
    }

    Ok(url.into())
}

/// `GET /public/anonymous-auth` URL.
///
/// # Errors
/// Returns `TransportError::InvalidUrl` for an unparsable region base.
pub fn anonymous_auth_url(config: &ClientConfig) -> Result<String, TransportError> {
    let mut url = public_url(config, "anonymous-auth")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("projectId", &config.project_id);
        if let Some(developer_id) = &config.developer_id {
            query.append_pair("developerId", developer_id);
        }
        if let Some(service_id) = &config.service_id {
            query.append_pair("serviceId", service_id);
        }
        if let Some(ttl) = config.anonym_ttl_seconds {
            query.append_pair("ttlInSeconds", &ttl.to_string());
        }
    }
    Ok(url.into())
}

/// `GET /public/auth-refresh` URL.
///
/// # Errors
/// Returns `TransportError::InvalidUrl` for an unparsable region base.
pub fn refresh_url(config: &ClientConfig, refresh_token: &str) -> Result<String, TransportError> {
    let mut url = public_url(config, "auth-refresh")?;
    url.query_pairs_mut()
        .append_pair("refreshToken", refresh_token);
    Ok(url.into())
}

/// `GET /public/auth` URL for custom-token exchange.
///
/// # Errors
/// Returns `TransportError::InvalidUrl` for an unparsable region base.
pub fn custom_auth_url(config: &ClientConfig, custom_token: &str) -> Result<String, TransportError> {
    let mut url = public_url(config, "auth")?;
    url.query_pairs_mut()
        .append_pair("customToken", custom_token);
    Ok(url.into())
}

/// Realtime socket URL carrying the access token.
///
/// # Errors
/// Returns `TransportError::InvalidUrl` for an unparsable socket base.
pub fn socket_url(config: &ClientConfig, access_token: &str) -> Result<String, TransportError> {
    let mut url = Url::parse(config.region.socket_base())
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut().append_pair("auth", access_token);
    Ok(url.into())
}

/// Document path of a cloud object scope.
#[must_use]
pub fn instance_path(project_id: &str, class_id: &str, instance_id: &str) -> String {
    format!("/projects/{project_id}/classes/{class_id}/instances/{instance_id}")
}

fn public_url(config: &ClientConfig, endpoint: &str) -> Result<Url, TransportError> {
    Url::parse(&format!(
        "{}/public/{endpoint}",
        config.region.write_base()
    ))
    .map_err(|e| TransportError::InvalidUrl(e.to_string()))
}
