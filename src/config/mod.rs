//! Configuration management for newsbridge
//!
//! Two layers live here:
//!
//! - [`Config`], the serde model loaded from defaults, a TOML file and the
//!   environment (in that order, later sources win);
//! - the [`Configuration`] trait consumed by requests, with [`Account`] as the
//!   in-memory implementation built from a [`Config`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use newsbridge::config::{Account, Config};
//!
//! let config = Config::load().expect("Failed to load configuration");
//! let account = Arc::new(Account::from_config(&config));
//! ```
//!
//! # Environment Variables
//!
//! Values can be overridden with `NEWSBRIDGE__<section>__<key>`:
//! - `NEWSBRIDGE__SERVER__HOST=cloud.example.com`
//! - `NEWSBRIDGE__REQUEST__TIMEOUT=1m`
//! - `NEWSBRIDGE__LOGIN_FLOW__POLLING_INTERVAL=3`
//!
//! The account password is only read from `NEWSBRIDGE_PASSWORD`.
//!
//! # Configuration File
//!
//! By default the file `config/newsbridge.toml` is read. Another path can be
//! set with the `NEWSBRIDGE_CONFIG` environment variable.

mod account;
mod models;
mod sources;
mod traits;
mod validation;

pub use crate::humanize::Seconds;
pub use account::Account;
pub use models::{AccountConfig, Config, LoginFlowConfig, RequestConfig, ServerConfig};
pub use traits::{Avatar, Configuration, CredentialsSink, DEFAULT_USER_AGENT};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[server]\nhost = \"cloud.example.com\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.server.host, "cloud.example.com");
        assert_eq!(config.request.timeout, Seconds(300));
    }

    #[test]
    fn test_validation_catches_bad_host() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[server]\nhost = \"https://cloud.example.com/\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::Validation(ValidationError::InvalidHost { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[login_flow]\npolling_interval = \"soon\"\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
host = "cloud.example.com"
port = 8443
use_ssl = true
install_path = "/nextcloud"
ignore_ssl_errors = false

[account]
username = "alice"

[request]
timeout = "2m"
user_agent = "Reader/2.0"
login_flow_user_agent = "Reader on laptop"

[login_flow]
polling_interval = 1
polling_timeout = "5m"
polling_request_timeout = 10
max_consecutive_timeouts = 3
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        let account = Account::from_config(&config);

        assert_eq!(account.host(), "cloud.example.com");
        assert_eq!(account.server_port(), 8443);
        assert_eq!(account.install_path(), "/nextcloud");
        assert_eq!(account.user_agent(), "Reader/2.0");
        assert_eq!(account.login_flow_user_agent(), "Reader on laptop");
        assert_eq!(config.request.timeout.as_secs(), 120);
        assert_eq!(config.login_flow.polling_timeout.as_secs(), 300);
        assert_eq!(config.login_flow.max_consecutive_timeouts, 3);
    }

    #[test]
    fn test_written_config_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("written.toml");

        let mut config = Config::default();
        config.server.host = "cloud.example.com".to_string();
        config.login_flow.polling_interval = Seconds(7);
        fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::load_from_path(config_path).unwrap();
        assert_eq!(loaded.server.host, "cloud.example.com");
        assert_eq!(loaded.login_flow.polling_interval, Seconds(7));
        assert_eq!(loaded.request.user_agent, None);
    }
}
