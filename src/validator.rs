//! Account check: version, then status, then user information
//!
//! Older News app versions do not know the later routes. A version below a
//! threshold ends the chain early with a warning, the check itself still
//! succeeds. Any critical failure aborts the chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::api::{GetStatus, GetUser, GetVersion, ServerStatus, UserInfo};
use crate::config::Configuration;
use crate::context::Context;
use crate::error::{Error, ErrorKind, Severity};
use crate::request::{Endpoint, Outcome, Request};
use crate::version::Version;

/// First News app version serving `GET /status`
pub fn min_status_version() -> Version {
    Version::new(5, 2, 4)
}

/// First News app version serving `GET /user`
pub fn min_user_version() -> Version {
    Version::new(6, 0, 5)
}

/// What the check found out, `status` and `user` stay empty when the
/// server is too old to provide them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub version: Version,
    pub status: Option<ServerStatus>,
    pub user: Option<UserInfo>,
    /// Set when the chain stopped early because of the server version
    pub warning: Option<Error>,
}

pub struct AccountValidator {
    context: Context,
    configuration: Option<Arc<dyn Configuration>>,
    running: AtomicBool,
}

impl AccountValidator {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            configuration: None,
            running: AtomicBool::new(false),
        }
    }

    /// Validate `configuration` instead of the context's
    pub fn with_configuration(context: Context, configuration: Arc<dyn Configuration>) -> Self {
        Self {
            context,
            configuration: Some(configuration),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn validate(&self) -> Outcome<AccountReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Account validation still in operation, ignoring validate");
            return Outcome::Rejected;
        }
        let _running = RunningGuard(&self.running);

        let configuration = self
            .configuration
            .clone()
            .unwrap_or_else(|| Arc::clone(self.context.configuration()));
        let span = info_span!(
            "validate_account",
            validation_id = %Uuid::new_v4(),
            host = %configuration.host()
        );

        let result = self.run(configuration).instrument(span).await;

        match result {
            Ok(report) => {
                info!(
                    version = %report.version,
                    has_status = report.status.is_some(),
                    has_user = report.user.is_some(),
                    "Account validated"
                );
                Outcome::Succeeded(report)
            }
            Err(outcome) => outcome,
        }
    }

    async fn run(
        &self,
        configuration: Arc<dyn Configuration>,
    ) -> Result<AccountReport, Outcome<AccountReport>> {
        debug!("Requesting server version");
        let version = self.step(GetVersion, &configuration).await.into_value()?;

        let mut report = AccountReport {
            version: version.clone(),
            status: None,
            user: None,
            warning: None,
        };

        if version < min_status_version() {
            report.warning = Some(too_old(
                &version,
                "The version of your News App is lower than 5.2.4. Status and user information can not be queried.",
            ));
            return Ok(report);
        }

        debug!("Requesting server status");
        let status = self.step(GetStatus, &configuration).await.into_value()?;
        let status_version = status.version.clone();
        report.status = Some(status);

        if status_version < min_user_version() {
            report.warning = Some(too_old(
                &status_version,
                "The version of your News App is lower than 6.0.5. User information can not be queried.",
            ));
            return Ok(report);
        }

        debug!("Requesting user information");
        report.user = Some(self.step(GetUser, &configuration).await.into_value()?);

        Ok(report)
    }

    async fn step<E: Endpoint>(
        &self,
        endpoint: E,
        configuration: &Arc<dyn Configuration>,
    ) -> Outcome<E::Output> {
        Request::with_configuration(endpoint, self.context.clone(), Arc::clone(configuration))
            .execute()
            .await
    }
}

fn too_old(version: &Version, message: &str) -> Error {
    warn!(%version, "{message}");
    Error::new(ErrorKind::Server, Severity::Warning, message).with_data(version.to_string())
}

/// Clears the running flag, also when `validate` is dropped mid-chain
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
