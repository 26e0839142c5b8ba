//! In-memory account configuration shared by requests

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tracing::{debug, error};

use super::models::Config;
use super::traits::{Avatar, Configuration, CredentialsSink, DEFAULT_USER_AGENT};
use crate::request::DEFAULT_TIMEOUT;
use crate::version::Version;

#[derive(Debug, Clone)]
struct AccountState {
    host: String,
    port: u16,
    use_ssl: bool,
    install_path: String,
    username: String,
    password: String,
    ignore_ssl_errors: bool,
    user_agent: String,
    login_flow_user_agent: Option<String>,
    request_timeout: Duration,
    server_version: Option<Version>,
    improperly_configured_cron: bool,
    display_name: Option<String>,
    avatar: Option<Avatar>,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            use_ssl: true,
            install_path: String::new(),
            username: String::new(),
            password: String::new(),
            ignore_ssl_errors: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            login_flow_user_agent: None,
            request_timeout: DEFAULT_TIMEOUT,
            server_version: None,
            improperly_configured_cron: false,
            display_name: None,
            avatar: None,
        }
    }
}

/// [`Configuration`] kept in memory behind a read-write lock
///
/// Typically wrapped in an `Arc` and handed to a [`crate::Context`].
#[derive(Debug, Default)]
pub struct Account {
    state: RwLock<AccountState>,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        let state = AccountState {
            host: config.server.host.clone(),
            port: config.server.port,
            use_ssl: config.server.use_ssl,
            install_path: normalize_install_path(&config.server.install_path),
            username: config.account.username.clone(),
            password: config.account.password.clone().unwrap_or_default(),
            ignore_ssl_errors: config.server.ignore_ssl_errors,
            user_agent: config
                .request
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            login_flow_user_agent: config.request.login_flow_user_agent.clone(),
            request_timeout: config.request.timeout.as_duration(),
            ..AccountState::default()
        };

        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AccountState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AccountState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_host(&self, host: impl Into<String>) {
        self.write().host = host.into();
    }

    pub fn set_server_port(&self, port: u16) {
        self.write().port = port;
    }

    pub fn set_use_ssl(&self, use_ssl: bool) {
        self.write().use_ssl = use_ssl;
    }

    pub fn set_install_path(&self, path: &str) {
        self.write().install_path = normalize_install_path(path);
    }

    pub fn set_username(&self, username: impl Into<String>) {
        self.write().username = username.into();
    }

    pub fn set_password(&self, password: impl Into<String>) {
        self.write().password = password.into();
    }

    pub fn set_ignore_ssl_errors(&self, ignore: bool) {
        self.write().ignore_ssl_errors = ignore;
    }

    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        self.write().user_agent = user_agent.into();
    }

    pub fn set_login_flow_user_agent(&self, user_agent: impl Into<String>) {
        self.write().login_flow_user_agent = Some(user_agent.into());
    }

    /// `Duration::ZERO` disables the timeout
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.write().request_timeout = timeout;
    }

    pub fn display_name(&self) -> Option<String> {
        self.read().display_name.clone()
    }

    pub fn avatar(&self) -> Option<Avatar> {
        self.read().avatar.clone()
    }

    pub fn improperly_configured_cron(&self) -> bool {
        self.read().improperly_configured_cron
    }

    /// Host, port, user name and password are all present
    pub fn is_account_valid(&self) -> bool {
        let state = self.read();
        !state.host.is_empty() && !state.username.is_empty() && !state.password.is_empty()
    }

    /// Take scheme, host, port and path from `url`. A URL without scheme
    /// is treated as https. Returns `false` if the URL is unusable.
    pub fn set_server_url(&self, url: &str) -> bool {
        let candidate = if url.contains("://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

        let parsed = match Url::parse(&candidate) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(url, error = %e, "Invalid server URL");
                return false;
            }
        };

        let use_ssl = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                error!(scheme = other, "Unsupported server URL scheme");
                return false;
            }
        };

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                error!(url, "Empty server host name");
                return false;
            }
        };

        let mut state = self.write();
        state.use_ssl = use_ssl;
        state.host = host;
        state.port = parsed.port().unwrap_or(0);
        state.install_path = normalize_install_path(parsed.path());
        true
    }
}

/// Leading slash, no trailing slashes; `/` alone becomes empty
fn normalize_install_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl Configuration for Account {
    fn host(&self) -> String {
        self.read().host.clone()
    }

    fn server_port(&self) -> u16 {
        self.read().port
    }

    fn use_ssl(&self) -> bool {
        self.read().use_ssl
    }

    fn install_path(&self) -> String {
        self.read().install_path.clone()
    }

    fn username(&self) -> String {
        self.read().username.clone()
    }

    fn password(&self) -> String {
        self.read().password.clone()
    }

    fn ignore_ssl_errors(&self) -> bool {
        self.read().ignore_ssl_errors
    }

    fn user_agent(&self) -> String {
        self.read().user_agent.clone()
    }

    fn request_timeout(&self) -> Duration {
        self.read().request_timeout
    }

    fn login_flow_user_agent(&self) -> String {
        let state = self.read();
        state
            .login_flow_user_agent
            .clone()
            .unwrap_or_else(|| state.user_agent.clone())
    }

    fn server_version(&self) -> Option<Version> {
        self.read().server_version.clone()
    }

    fn set_server_version(&self, version: Version) {
        debug!(%version, "Changed server version");
        self.write().server_version = Some(version);
    }

    fn set_improperly_configured_cron(&self, improperly_configured: bool) {
        self.write().improperly_configured_cron = improperly_configured;
    }

    fn set_display_name(&self, display_name: &str) {
        self.write().display_name = Some(display_name.to_string());
    }

    fn set_avatar(&self, avatar: Option<Avatar>) {
        self.write().avatar = avatar;
    }

    fn set_login_flow_credentials(&self, credentials: &[u8]) -> bool {
        if credentials.is_empty() {
            error!("Failed to set login flow credentials from empty data");
            return false;
        }

        let json: Value = match serde_json::from_slice(credentials) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to parse the login flow credential data");
                return false;
            }
        };

        let Some(object) = json.as_object().filter(|o| !o.is_empty()) else {
            error!("Login flow credentials are not a non-empty JSON object");
            return false;
        };

        let login_name = object.get("loginName").and_then(Value::as_str).unwrap_or_default();
        if login_name.is_empty() {
            error!("Failed to set login flow credentials with empty login name");
            return false;
        }

        let app_password = object.get("appPassword").and_then(Value::as_str).unwrap_or_default();
        if app_password.is_empty() {
            error!("Failed to set login flow credentials with empty application password");
            return false;
        }

        if let Some(server) = object.get("server") {
            let server = server.as_str().unwrap_or_default();
            if !self.set_server_url(server) {
                error!(server, "Failed to set login flow credentials with invalid server URL");
                return false;
            }
        }

        let mut state = self.write();
        state.username = login_name.to_string();
        state.password = app_password.to_string();
        true
    }
}

impl CredentialsSink for Account {
    fn accept_credentials(&self, credentials: &[u8]) -> bool {
        self.set_login_flow_credentials(credentials)
    }
}
