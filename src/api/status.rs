use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::version::parse_version;
use super::{missing_field, reply_object};
use crate::config::Configuration;
use crate::error::Error;
use crate::request::{ApiResponse, Endpoint, ExpectedShape, RequestDescriptor};
use crate::version::Version;

/// What `GET /status` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub version: Version,
    /// The server's cron job is not set up, feeds are not updated in the background
    pub improperly_configured_cron: bool,
}

/// `GET /status`, available since News 5.2.4
#[derive(Debug, Clone, Copy, Default)]
pub struct GetStatus;

impl Endpoint for GetStatus {
    type Output = ServerStatus;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::get("/status").expect(ExpectedShape::Object)
    }

    fn check_output(&mut self, response: &ApiResponse) -> Result<ServerStatus, Error> {
        let reply = reply_object(response)?;

        let raw = reply
            .get("version")
            .ok_or_else(|| missing_field("Can not find the version information in the server reply."))?;
        let version = parse_version(raw.as_str().unwrap_or_default())?;

        let warnings = reply
            .get("warnings")
            .ok_or_else(|| missing_field("Can not find the warnings information in the server reply."))?;

        Ok(ServerStatus {
            version,
            improperly_configured_cron: warnings
                .get("improperlyConfiguredCron")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    fn on_success(&mut self, status: &ServerStatus, configuration: &dyn Configuration) {
        debug!(version = %status.version, "Received server status");
        if status.improperly_configured_cron {
            warn!("The News app cron job on the server is not configured properly");
        }

        configuration.set_server_version(status.version.clone());
        configuration.set_improperly_configured_cron(status.improperly_configured_cron);
    }
}
