use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use dicom_dictionary_std::uids;
use dimse::{DimseConfig, RemoteNode};
use serde::Deserialize;
use thiserror::Error;

use crate::config::LoggingConfig;
use crate::storage::StorageConfig;

/// Top-level configuration of the service provider
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scp: DimseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    /// Known move destinations keyed by AE title
    #[serde(default)]
    pub ae_titles: HashMap<String, RemoteNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Storage SOP Class UIDs accepted by C-STORE
    #[serde(default = "default_storage_sop_classes")]
    pub storage_sop_classes: Vec<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            storage_sop_classes: default_storage_sop_classes(),
        }
    }
}

fn default_storage_sop_classes() -> Vec<String> {
    [
        uids::CT_IMAGE_STORAGE,
        uids::MR_IMAGE_STORAGE,
        uids::COMPUTED_RADIOGRAPHY_IMAGE_STORAGE,
        uids::NUCLEAR_MEDICINE_IMAGE_STORAGE,
        uids::ULTRASOUND_IMAGE_STORAGE,
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
    ]
    .iter()
    .map(|uid| uid.to_string())
    .collect()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid [scp] section: {0}")]
    InvalidScp(String),
    #[error("invalid [storage] section: {0}")]
    InvalidStorage(String),
    #[error("invalid [logging] section: {0}")]
    InvalidLogging(String),
    #[error("invalid [services] section: {0}")]
    InvalidServices(String),
    #[error("invalid AE title entry '{name}': {reason}")]
    InvalidAeTitle { name: String, reason: String },
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parse and validate a TOML document. AE title entries without an
    /// explicit `ae_title` take the table key.
    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(toml_str)?;
        for (name, node) in config.ae_titles.iter_mut() {
            if node.ae_title.is_empty() {
                node.ae_title = name.clone();
            }
        }
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        contents.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scp
            .validate()
            .map_err(|e| ConfigError::InvalidScp(e.to_string()))?;

        self.storage
            .validate()
            .map_err(|e| ConfigError::InvalidStorage(e.to_string()))?;

        self.logging.validate()?;

        if self.scp.enable_store && self.services.storage_sop_classes.is_empty() {
            return Err(ConfigError::InvalidServices(
                "storage_sop_classes cannot be empty while C-STORE is enabled".to_string(),
            ));
        }
        if let Some(uid) = self
            .services
            .storage_sop_classes
            .iter()
            .find(|uid| !is_valid_uid(uid))
        {
            return Err(ConfigError::InvalidServices(format!(
                "'{}' is not a valid SOP Class UID",
                uid
            )));
        }

        for (name, node) in &self.ae_titles {
            node.validate().map_err(|e| ConfigError::InvalidAeTitle {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            if node.ae_title != *name {
                return Err(ConfigError::InvalidAeTitle {
                    name: name.clone(),
                    reason: format!("entry declares ae_title '{}'", node.ae_title),
                });
            }
        }

        Ok(())
    }
}

fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}
