//! Caller-supplied unit of work.

use std::collections::HashMap;

use serde_json::Value;

/// A named remote operation plus payload and routing hints.
///
/// Immutable once submitted to the dispatch pipeline.
#[derive(Debug, Clone, Default)]
pub struct Action {
    /// Dotted action name, e.g. `rbs.product.request.SEARCH`.
    pub name: String,
    /// JSON payload; body for POST actions, `data=` query parameter for GET.
    pub payload: Option<Value>,
    /// Route the action to a specific service.
    pub target_service_id: Option<String>,
    /// Act on behalf of a related user (trusted callers only).
    pub related_user_id: Option<String>,
    /// Locale hint forwarded as `culture=`.
    pub culture: Option<String>,
    /// Arbitrary caller headers, carried base64url-encoded in the query so
    /// they survive proxies that drop unknown header names.
    pub headers: Option<HashMap<String, String>>,
}

impl Action {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Read-type actions carry `get` as the third dotted segment
    /// (`x.y.get.Z`) and are routed as GET against the region's read
    /// endpoint; everything else POSTs to the write endpoint.
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.name.split('.').nth(2) == Some("get")
    }
}
