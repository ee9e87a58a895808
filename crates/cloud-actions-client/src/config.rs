//! Engine configuration and region table.

use std::str::FromStr;

use thiserror::Error;

/// Configuration error. Fatal and synchronous; never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Engine used before initialization")]
    NotInitialized,
    #[error("Engine already initialized")]
    AlreadyInitialized,
    #[error("Unrecognized region: {0}")]
    InvalidRegion(String),
    #[error("Project id is required")]
    MissingProjectId,
}

/// Deployment region. Get-class actions go to the read base, everything
/// else to the write base; the socket host serves the realtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    EuWest1,
    EuWest1Beta,
    /// Self-hosted or test deployment.
    Custom {
        read_url: String,
        write_url: String,
        socket_url: String,
    },
}

impl Region {
    #[must_use]
    pub fn read_base(&self) -> &str {
        match self {
            Self::EuWest1 => "https://core-read.rettermobile.com",
            Self::EuWest1Beta => "https://core-read-test.rettermobile.com",
            Self::Custom { read_url, .. } => read_url,
        }
    }

    #[must_use]
    pub fn write_base(&self) -> &str {
        match self {
            Self::EuWest1 => "https://core.rettermobile.com",
            Self::EuWest1Beta => "https://core-test.rettermobile.com",
            Self::Custom { write_url, .. } => write_url,
        }
    }

    #[must_use]
    pub fn socket_base(&self) -> &str {
        match self {
            Self::EuWest1 => "wss://socket.rettermobile.com",
            Self::EuWest1Beta => "wss://socket-test.rettermobile.com",
            Self::Custom { socket_url, .. } => socket_url,
        }
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eu-west-1" => Ok(Self::EuWest1),
            "eu-west-1-beta" => Ok(Self::EuWest1Beta),
            other => Err(ConfigError::InvalidRegion(other.to_string())),
        }
    }
}

/// Client configuration, fixed for the lifetime of one engine context.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub project_id: String,
    pub region: Region,
    /// Long-lived secret for locally signed service credentials.
    pub secret_key: Option<String>,
    pub developer_id: Option<String>,
    pub service_id: Option<String>,
    /// Bound for anonymous credential lifetime, forwarded as `ttlInSeconds`.
    pub anonym_ttl_seconds: Option<u64>,
    /// Default locale, forwarded as `culture=` unless the action overrides.
    pub culture: Option<String>,
    /// Host platform tag, forwarded as `platform=`.
    pub platform: Option<String>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: Region::EuWest1,
            secret_key: None,
            developer_id: None,
            service_id: None,
            anonym_ttl_seconds: None,
            culture: None,
            platform: None,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Configure the service identity used for locally signed credentials.
    #[must_use]
    pub fn with_service_identity(
        mut self,
        developer_id: impl Into<String>,
        service_id: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.developer_id = Some(developer_id.into());
        self.service_id = Some(service_id.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// True when the engine should mint service credentials locally
    /// instead of going through the token endpoints.
    #[must_use]
    pub fn has_service_identity(&self) -> bool {
        self.secret_key.is_some() && self.service_id.is_some()
    }

    /// # Errors
    /// Returns `ConfigError::MissingProjectId` when the project id is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        Ok(())
    }
}
