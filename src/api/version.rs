use tracing::debug;

use super::{missing_field, reply_object};
use crate::config::Configuration;
use crate::error::{Error, ErrorKind};
use crate::request::{ApiResponse, Endpoint, ExpectedShape, RequestDescriptor};
use crate::version::Version;

/// `GET /version`, stores the News app version on the configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct GetVersion;

impl Endpoint for GetVersion {
    type Output = Version;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::get("/version").expect(ExpectedShape::Object)
    }

    fn check_output(&mut self, response: &ApiResponse) -> Result<Version, Error> {
        let reply = reply_object(response)?;
        let raw = reply
            .get("version")
            .ok_or_else(|| missing_field("Can not find the version information in the server reply."))?;

        parse_version(raw.as_str().unwrap_or_default())
    }

    fn on_success(&mut self, version: &Version, configuration: &dyn Configuration) {
        debug!(%version, "Received server version");
        configuration.set_server_version(version.clone());
    }
}

pub(super) fn parse_version(raw: &str) -> Result<Version, Error> {
    raw.parse().map_err(|_| {
        Error::critical(ErrorKind::Output, "Server reply contains invalid version number.")
            .with_data(raw)
    })
}
