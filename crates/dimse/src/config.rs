//! Configuration types for DIMSE services

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DimseError, Result};

/// Configuration for the service provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimseConfig {
    /// Local Application Entity Title
    #[serde(default = "default_local_aet")]
    pub local_aet: String,

    /// Outbound connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum number of requests executed concurrently
    #[serde(default = "default_max_associations")]
    pub max_associations: u32,

    /// Enable C-ECHO service
    #[serde(default = "default_true")]
    pub enable_echo: bool,

    /// Enable C-STORE service
    #[serde(default = "default_true")]
    pub enable_store: bool,

    /// Enable C-FIND service
    #[serde(default = "default_true")]
    pub enable_find: bool,

    /// Enable C-MOVE service
    #[serde(default = "default_true")]
    pub enable_move: bool,
}

/// Configuration for a remote DICOM node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    /// Remote Application Entity Title
    #[serde(default)]
    pub ae_title: String,

    /// Remote host address
    pub host: String,

    /// Remote port
    pub port: u16,

    /// Connection timeout in milliseconds (overrides global setting)
    pub connect_timeout_ms: Option<u64>,
}

/// Resolves move destination AE titles to network nodes
#[async_trait]
pub trait AeDirectory: Send + Sync {
    async fn resolve(&self, ae_title: &str) -> Option<RemoteNode>;
}

impl Default for DimseConfig {
    fn default() -> Self {
        Self {
            local_aet: default_local_aet(),
            connect_timeout_ms: default_connect_timeout(),
            max_associations: default_max_associations(),
            enable_echo: true,
            enable_store: true,
            enable_find: true,
            enable_move: true,
        }
    }
}

impl DimseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_ae_title(&self.local_aet)?;

        if self.max_associations == 0 {
            return Err(DimseError::config("max_associations must be at least 1"));
        }

        Ok(())
    }
}

impl RemoteNode {
    /// Create a new remote node configuration
    pub fn new(ae_title: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ae_title: ae_title.into(),
            host: host.into(),
            port,
            connect_timeout_ms: None,
        }
    }

    /// Set connection timeout for this node
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    /// `host:port` form used when dialing the node
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the remote node configuration
    pub fn validate(&self) -> Result<()> {
        validate_ae_title(&self.ae_title)?;

        if self.host.is_empty() {
            return Err(DimseError::config("Remote host cannot be empty"));
        }

        if self.port == 0 {
            return Err(DimseError::config("Remote port must be greater than 0"));
        }

        Ok(())
    }
}

/// AE titles are 1-16 characters of the default repertoire, no backslash
pub fn validate_ae_title(ae_title: &str) -> Result<()> {
    let trimmed = ae_title.trim();
    if trimmed.is_empty() || ae_title.len() > 16 {
        return Err(DimseError::InvalidAeTitle(format!(
            "'{}' must be 1-16 characters",
            ae_title
        )));
    }
    if ae_title.chars().any(|c| c == '\\' || !c.is_ascii() || c.is_ascii_control()) {
        return Err(DimseError::InvalidAeTitle(format!(
            "'{}' contains invalid characters",
            ae_title
        )));
    }
    Ok(())
}

// Default value functions
fn default_local_aet() -> String {
    "PACS_SCP".to_string()
}

fn default_connect_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_max_associations() -> u32 {
    10
}

fn default_true() -> bool {
    true
}
