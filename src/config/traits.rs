use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::DEFAULT_TIMEOUT;

use crate::version::Version;

/// User agent sent when the configuration does not name one
pub const DEFAULT_USER_AGENT: &str = concat!("newsbridge/", env!("CARGO_PKG_VERSION"));

/// Avatar image as delivered by the News API (base64 data plus MIME type)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Avatar {
    pub data: String,
    pub mime: String,
}

/// Account and server data consumed by requests
///
/// The getters are read when a request is built, the setters are called by
/// success hooks to store what the server reported. Implementations are
/// shared between many requests, so all methods take `&self`.
pub trait Configuration: Send + Sync {
    fn host(&self) -> String;

    /// 0 selects the default port of the scheme
    fn server_port(&self) -> u16 {
        0
    }

    fn use_ssl(&self) -> bool {
        true
    }

    fn install_path(&self) -> String;

    fn username(&self) -> String;

    fn password(&self) -> String;

    fn ignore_ssl_errors(&self) -> bool {
        false
    }

    /// Used by requests whose descriptor sets no timeout of its own
    fn request_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    fn user_agent(&self) -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    fn login_flow_user_agent(&self) -> String {
        self.user_agent()
    }

    fn server_version(&self) -> Option<Version> {
        None
    }

    fn set_server_version(&self, _version: Version) {}

    fn set_improperly_configured_cron(&self, _improperly_configured: bool) {}

    fn set_display_name(&self, _display_name: &str) {}

    fn set_avatar(&self, _avatar: Option<Avatar>) {}

    /// Store the credentials returned by a finished login flow. Returns
    /// `false` if the data is malformed.
    fn set_login_flow_credentials(&self, _credentials: &[u8]) -> bool {
        false
    }
}

/// Target for the raw credential data of a successful login flow
pub trait CredentialsSink: Send + Sync {
    /// Returns `false` if the data is malformed
    fn accept_credentials(&self, credentials: &[u8]) -> bool;
}
