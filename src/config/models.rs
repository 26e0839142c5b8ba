use crate::humanize::Seconds;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub login_flow: LoginFlowConfig,
}

/// Where the Nextcloud/ownCloud instance lives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host name only, no scheme and no path
    #[serde(default)]
    pub host: String,
    /// 0 selects the default port of the scheme
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    /// Sub path the instance is installed below, e.g. `/nextcloud`
    #[serde(default)]
    pub install_path: String,
    #[serde(default)]
    pub ignore_ssl_errors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            use_ssl: default_use_ssl(),
            install_path: String::new(),
            ignore_ssl_errors: false,
        }
    }
}

fn default_use_ssl() -> bool {
    true
}

/// Account credentials
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub username: String,
    /// Loaded from the environment, never from the config file
    #[serde(skip)]
    pub password: Option<String>,
}

/// Defaults for single API requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestConfig {
    #[serde(default = "default_request_timeout")]
    pub timeout: Seconds,
    pub user_agent: Option<String>,
    /// User agent sent when requesting a login flow, shown to the user by
    /// the server when granting access
    pub login_flow_user_agent: Option<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            user_agent: None,
            login_flow_user_agent: None,
        }
    }
}

fn default_request_timeout() -> Seconds {
    Seconds(300)
}

/// Login Flow v2 polling behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginFlowConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval: Seconds,
    /// Overall deadline for the user to grant access
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout: Seconds,
    /// Timeout of a single polling request
    #[serde(default = "default_polling_request_timeout")]
    pub polling_request_timeout: Seconds,
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
}

impl Default for LoginFlowConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval(),
            polling_timeout: default_polling_timeout(),
            polling_request_timeout: default_polling_request_timeout(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
        }
    }
}

fn default_polling_interval() -> Seconds {
    Seconds(2)
}

fn default_polling_timeout() -> Seconds {
    Seconds(300)
}

fn default_polling_request_timeout() -> Seconds {
    Seconds(5)
}

fn default_max_consecutive_timeouts() -> u32 {
    5
}
