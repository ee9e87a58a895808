//! HTTP transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use cloud_actions_core::traits::{HttpTransport, TransportError};
use serde_json::Value;

/// Fixed per-request timeout; there is no per-action override.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `reqwest`-backed transport.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the default timeout.
    ///
    /// # Errors
    /// Returns `TransportError::Request` if the underlying client cannot
    /// be constructed.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    async fn into_value(response: reqwest::Response) -> Result<Value, TransportError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            Ok(body)
        } else {
            Err(status_error(status.as_u16(), &body))
        }
    }
}

/// Map a non-success response to an error carrying the server's `message`
/// field when present.
fn status_error(status: u16, body: &Value) -> TransportError {
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    TransportError::Status { status, message }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Self::into_value(response).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Self::into_value(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_picks_server_message() {
        let body = serde_json::json!({"message": "no such action"});
        match status_error(404, &body) {
            TransportError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such action");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_status_error_without_message() {
        match status_error(500, &Value::Null) {
            TransportError::Status { status, message } => {
                assert_eq!(status, 500);
                assert!(message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
