use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::config::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default = "default_log_file_path")]
    pub log_file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_to_file: false,
            log_file_path: default_log_file_path(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidLogging("log_level is empty".to_string()));
        }
        // Parsed as init_logging parses it
        EnvFilter::try_new(&self.log_level).map_err(|e| {
            ConfigError::InvalidLogging(format!("invalid log_level '{}': {}", self.log_level, e))
        })?;
        if self.log_to_file && self.log_file_path.trim().is_empty() {
            return Err(ConfigError::InvalidLogging(
                "log_file_path is required when log_to_file is set".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_path() -> String {
    "./tmp/pacs-scp.log".to_string()
}
