use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;

use crate::config::Configuration;
use crate::error::Error;
use crate::notify::{Notification, Notificator};
use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Asked whether the server ordered a remote wipe
///
/// Called after an authenticated News API request was answered with 401 or
/// 403, which is how the server signals a revoked app password. Looking up
/// the wipe status and acting on it is left to the implementation.
pub trait WipeHandler: Send + Sync {
    fn check_for_wipe(&self);
}

/// Everything a request needs besides its own description
///
/// Cloning is cheap, all members are shared. A request may carry its own
/// [`Configuration`] which then takes precedence over the one held here.
#[derive(Clone)]
pub struct Context {
    configuration: Arc<dyn Configuration>,
    client: Client,
    insecure_client: Client,
    notificator: Option<Arc<dyn Notificator>>,
    wipe_handler: Option<Arc<dyn WipeHandler>>,
    metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(configuration: Arc<dyn Configuration>) -> Result<Self, ContextError> {
        Ok(Self {
            configuration,
            client: build_client(false)?,
            insecure_client: build_client(true)?,
            notificator: None,
            wipe_handler: None,
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn with_notificator(mut self, notificator: Arc<dyn Notificator>) -> Self {
        self.notificator = Some(notificator);
        self
    }

    pub fn with_wipe_handler(mut self, wipe_handler: Arc<dyn WipeHandler>) -> Self {
        self.wipe_handler = Some(wipe_handler);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn configuration(&self) -> &Arc<dyn Configuration> {
        &self.configuration
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// HTTP client honouring the TLS preference of `configuration`
    pub fn client_for(&self, configuration: &dyn Configuration) -> Client {
        if configuration.ignore_ssl_errors() {
            tracing::debug!(host = %configuration.host(), "Ignoring TLS certificate errors");
            self.insecure_client.clone()
        } else {
            self.client.clone()
        }
    }

    pub fn notify(&self, notification: Notification) {
        if let Some(notificator) = &self.notificator {
            notificator.notify(notification);
        }
    }

    pub fn notify_error(&self, error: &Error) {
        self.notify(Notification::from_error(error));
    }

    pub fn check_for_wipe(&self) {
        if let Some(wipe_handler) = &self.wipe_handler {
            tracing::info!(host = %self.configuration.host(), "Access denied, checking for remote wipe");
            wipe_handler.check_for_wipe();
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("host", &self.configuration.host())
            .field("has_notificator", &self.notificator.is_some())
            .field("has_wipe_handler", &self.wipe_handler.is_some())
            .finish_non_exhaustive()
    }
}

// Timeouts are enforced per request by the caller, not by the client
fn build_client(accept_invalid_certs: bool) -> Result<Client, reqwest::Error> {
    Client::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}
