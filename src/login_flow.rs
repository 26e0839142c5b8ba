//! Nextcloud Login Flow v2
//!
//! The flow asks the server for a login URL and a polling token, hands the
//! URL to the application (to open it in a browser) and then polls the
//! server until the user granted access:
//!
//! ```text
//! NotStarted -> AwaitingInitialResponse -> Polling -> Succeeded | Failed | TimedOut
//!                          \__________________\____cancel()__> Cancelled
//! ```
//!
//! Polling requests are strictly sequential. Each one has its own timeout,
//! the whole run has an overall deadline, and a run of consecutive request
//! timeouts ends the flow early. The login URL and the outcome are published
//! as [`LoginFlowEvent`]s on a broadcast channel, the countdown to the
//! deadline on [`LoginFlow::watch_seconds_left`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;
use serde_json::{Value, json};
use thiserror::Error as ThisError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep, sleep_until};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Configuration, CredentialsSink, LoginFlowConfig};
use crate::context::Context;
use crate::error::{Error, ErrorKind, Failure, Severity, seconds_phrase};
use crate::notify::{Notification, NotificationKind};
use crate::request::{
    ApiBase, ApiResponse, Endpoint, ExpectedShape, Outcome, Payload, PreparedRequest, Request,
    RequestDescriptor, Transfer, build_headers, check_host, send, with_timeout,
};

/// Route of the initial request, below the install path
pub const LOGIN_FLOW_PATH: &str = "/index.php/login/v2";

const EVENT_CAPACITY: usize = 64;

// About 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Can not change {0} while the login flow is in operation")]
    InOperation(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginFlowSettings {
    /// Pause after a "not yet" reply
    pub polling_interval: Duration,
    /// Overall deadline, counted from the start of polling
    pub polling_timeout: Duration,
    /// Timeout of a single polling request
    pub polling_request_timeout: Duration,
    /// Consecutive request timeouts that end the flow
    pub max_consecutive_timeouts: u32,
}

impl Default for LoginFlowSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(2),
            polling_timeout: Duration::from_secs(300),
            polling_request_timeout: Duration::from_secs(5),
            max_consecutive_timeouts: 5,
        }
    }
}

impl From<&LoginFlowConfig> for LoginFlowSettings {
    fn from(config: &LoginFlowConfig) -> Self {
        Self {
            polling_interval: config.polling_interval.as_duration(),
            polling_timeout: config.polling_timeout.as_duration(),
            polling_request_timeout: config.polling_request_timeout.as_duration(),
            max_consecutive_timeouts: config.max_consecutive_timeouts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    NotStarted,
    AwaitingInitialResponse,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl LoginPhase {
    pub fn is_running(self) -> bool {
        matches!(self, LoginPhase::AwaitingInitialResponse | LoginPhase::Polling)
    }
}

#[derive(Debug, Clone)]
pub enum LoginFlowEvent {
    /// Open this URL in a browser to grant access
    LoginUrl(Url),
    /// The credential reply of the server
    Succeeded(Value),
    Failed(Error),
}

/// What the initial request delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub login_url: Url,
    pub token: String,
    pub endpoint: Url,
}

/// `POST /index.php/login/v2`, unauthenticated and without body
struct InitiateLogin {
    user_agent: String,
}

impl Endpoint for InitiateLogin {
    type Output = LoginGrant;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::post(LOGIN_FLOW_PATH)
            .base(ApiBase::Root)
            .requires_auth(false)
            .check_for_wipe(false)
            .expect(ExpectedShape::Object)
            .header("User-Agent", self.user_agent.clone())
    }

    fn check_input(
        &self,
        _descriptor: &RequestDescriptor,
        configuration: &dyn Configuration,
    ) -> Result<(), Error> {
        check_host(configuration)
    }

    fn check_output(&mut self, response: &ApiResponse) -> Result<LoginGrant, Error> {
        parse_grant(response.json())
    }
}

fn parse_grant(reply: &Value) -> Result<LoginGrant, Error> {
    let raw_login = reply.get("login").and_then(Value::as_str).unwrap_or_default();
    let login_url = parse_http_url(raw_login).ok_or_else(|| {
        error!(login = raw_login, "Invalid login flow login URL");
        Error::critical(
            ErrorKind::Output,
            "The login URL returned by the Nextcloud API is invalid.",
        )
        .with_data(raw_login)
    })?;

    let poll = reply.get("poll");
    let token = poll
        .and_then(|p| p.get("token"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if token.is_empty() {
        error!("Empty login flow polling token");
        return Err(Error::critical(
            ErrorKind::Output,
            "The Nextcloud API returned an empty polling token.",
        ));
    }

    let raw_endpoint = poll
        .and_then(|p| p.get("endpoint"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let endpoint = parse_http_url(raw_endpoint).ok_or_else(|| {
        error!(endpoint = raw_endpoint, "Invalid login flow polling endpoint");
        Error::critical(
            ErrorKind::Output,
            "The Nextcloud API returned an invalid polling URL.",
        )
        .with_data(raw_endpoint)
    })?;

    Ok(LoginGrant {
        login_url,
        token: token.to_string(),
        endpoint,
    })
}

/// `now + timeout`, clamped to a far future instant when that overflows
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

fn parse_http_url(raw: &str) -> Option<Url> {
    Url::parse(raw)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

enum Terminal {
    Succeeded(Value),
    /// `reported` is set when the failing request already notified
    Failed { error: Error, reported: bool },
    TimedOut(Error),
    Cancelled,
}

struct FlowState {
    phase: LoginPhase,
    settings: LoginFlowSettings,
    configuration: Option<Arc<dyn Configuration>>,
    sink: Option<Arc<dyn CredentialsSink>>,
    grant: Option<LoginGrant>,
    deadline: Option<Instant>,
    consecutive_timeouts: u32,
    polls_sent: u32,
    last_error: Option<Error>,
}

struct FlowInner {
    context: Context,
    state: Mutex<FlowState>,
    events: broadcast::Sender<LoginFlowEvent>,
    seconds_left: watch::Sender<u64>,
    cancel: watch::Sender<bool>,
}

/// Login Flow v2 state machine
///
/// Clones share the same run, so one clone can `cancel()` while another
/// awaits `start()`.
#[derive(Clone)]
pub struct LoginFlow {
    inner: Arc<FlowInner>,
}

impl LoginFlow {
    pub fn new(context: Context) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (seconds_left, _) = watch::channel(0);
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(FlowInner {
                context,
                state: Mutex::new(FlowState {
                    phase: LoginPhase::NotStarted,
                    settings: LoginFlowSettings::default(),
                    configuration: None,
                    sink: None,
                    grant: None,
                    deadline: None,
                    consecutive_timeouts: 0,
                    polls_sent: 0,
                    last_error: None,
                }),
                events,
                seconds_left,
                cancel,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F>(&self, field: &'static str, f: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut FlowState),
    {
        let mut state = self.lock();
        if state.phase.is_running() {
            warn!(field, "Can not change setting, login flow still in operation");
            return Err(SettingsError::InOperation(field));
        }
        f(&mut state);
        debug!(field, "Changed login flow setting");
        Ok(())
    }

    pub fn set_settings(&self, settings: LoginFlowSettings) -> Result<(), SettingsError> {
        self.update("settings", |s| s.settings = settings)
    }

    pub fn set_polling_interval(&self, interval: Duration) -> Result<(), SettingsError> {
        self.update("polling_interval", |s| s.settings.polling_interval = interval)
    }

    pub fn set_polling_timeout(&self, timeout: Duration) -> Result<(), SettingsError> {
        self.update("polling_timeout", |s| s.settings.polling_timeout = timeout)
    }

    pub fn set_polling_request_timeout(&self, timeout: Duration) -> Result<(), SettingsError> {
        self.update("polling_request_timeout", |s| {
            s.settings.polling_request_timeout = timeout
        })
    }

    pub fn set_max_consecutive_timeouts(&self, max: u32) -> Result<(), SettingsError> {
        self.update("max_consecutive_timeouts", |s| {
            s.settings.max_consecutive_timeouts = max
        })
    }

    /// Use this configuration instead of the context's
    pub fn set_configuration(&self, configuration: Arc<dyn Configuration>) -> Result<(), SettingsError> {
        self.update("configuration", |s| s.configuration = Some(configuration))
    }

    /// Hand the credentials to `sink` instead of the configuration
    pub fn set_credentials_sink(&self, sink: Arc<dyn CredentialsSink>) -> Result<(), SettingsError> {
        self.update("credentials_sink", |s| s.sink = Some(sink))
    }

    pub fn settings(&self) -> LoginFlowSettings {
        self.lock().settings
    }

    pub fn phase(&self) -> LoginPhase {
        self.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Login URL of the current or last run
    pub fn login_url(&self) -> Option<Url> {
        self.lock().grant.as_ref().map(|g| g.login_url.clone())
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.lock().consecutive_timeouts
    }

    /// Polling requests sent in the current or last run
    pub fn polls_sent(&self) -> u32 {
        self.lock().polls_sent
    }

    /// Seconds until the overall deadline, 0 when not polling
    pub fn seconds_left(&self) -> u64 {
        self.lock()
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()).as_secs())
            .unwrap_or(0)
    }

    pub fn last_error(&self) -> Option<Error> {
        self.lock().last_error.clone()
    }

    /// Login URL and outcome events. A run sends at most two, so a
    /// receiver never lags behind the buffer.
    pub fn subscribe(&self) -> broadcast::Receiver<LoginFlowEvent> {
        self.inner.events.subscribe()
    }

    /// Countdown to the overall deadline, updated once per second while
    /// polling and reset to 0 when the run ends
    pub fn watch_seconds_left(&self) -> watch::Receiver<u64> {
        self.inner.seconds_left.subscribe()
    }

    /// Stop a running flow. No success or failure is reported and `start`
    /// resolves to [`Outcome::Cancelled`].
    pub fn cancel(&self) {
        let state = self.lock();
        if state.phase.is_running() {
            debug!("Cancelling login flow");
            self.inner.cancel.send_replace(true);
        }
    }

    /// Run the whole flow. Resolves with the credential reply on success.
    pub async fn start(&self) -> Outcome<Value> {
        let (settings, configuration, sink, mut cancelled) = {
            let mut state = self.lock();
            if state.phase.is_running() {
                warn!("Login flow still in operation, ignoring start");
                return Outcome::Rejected;
            }

            state.phase = LoginPhase::AwaitingInitialResponse;
            state.grant = None;
            state.deadline = None;
            state.consecutive_timeouts = 0;
            state.polls_sent = 0;
            state.last_error = None;
            self.inner.cancel.send_replace(false);

            let configuration = state
                .configuration
                .clone()
                .unwrap_or_else(|| Arc::clone(self.inner.context.configuration()));
            (
                state.settings,
                configuration,
                state.sink.clone(),
                self.inner.cancel.subscribe(),
            )
        };

        let flow_id = Uuid::new_v4();
        let span = info_span!("login_flow", %flow_id, host = %configuration.host());

        async move {
            let mut guard = PhaseGuard {
                flow: self,
                armed: true,
            };
            let terminal = self
                .run(&settings, &configuration, sink.as_deref(), &mut cancelled)
                .await;
            guard.armed = false;
            self.finish(terminal, configuration.as_ref())
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        settings: &LoginFlowSettings,
        configuration: &Arc<dyn Configuration>,
        sink: Option<&dyn CredentialsSink>,
        cancelled: &mut watch::Receiver<bool>,
    ) -> Terminal {
        debug!("Requesting login flow URL");
        let initial = Request::with_configuration(
            InitiateLogin {
                user_agent: configuration.login_flow_user_agent(),
            },
            self.inner.context.clone(),
            Arc::clone(configuration),
        );

        let outcome = tokio::select! {
            biased;
            _ = cancelled.wait_for(|c| *c) => return Terminal::Cancelled,
            outcome = initial.execute() => outcome,
        };

        let grant = match outcome {
            Outcome::Succeeded(grant) => grant,
            Outcome::Failed(error) => {
                return Terminal::Failed {
                    error,
                    reported: true,
                };
            }
            Outcome::Cancelled | Outcome::Rejected => return Terminal::Cancelled,
        };

        info!(login_url = %grant.login_url, endpoint = %grant.endpoint, "Received login flow data, starting to poll");

        let deadline = deadline_after(settings.polling_timeout);
        {
            let mut state = self.lock();
            state.grant = Some(grant.clone());
            state.deadline = Some(deadline);
            state.phase = LoginPhase::Polling;
        }
        let _ = self
            .inner
            .events
            .send(LoginFlowEvent::LoginUrl(grant.login_url.clone()));

        let _countdown = Countdown::start(self.inner.seconds_left.clone(), deadline);
        self.poll(settings, configuration.as_ref(), sink, &grant, deadline, cancelled)
            .await
    }

    async fn poll(
        &self,
        settings: &LoginFlowSettings,
        configuration: &dyn Configuration,
        sink: Option<&dyn CredentialsSink>,
        grant: &LoginGrant,
        deadline: Instant,
        cancelled: &mut watch::Receiver<bool>,
    ) -> Terminal {
        let prepared = polling_request(grant, configuration);
        let client = self.inner.context.client_for(configuration);
        let overall_timeout = || {
            Terminal::TimedOut(Error::critical(
                ErrorKind::Request,
                format!(
                    "The required authorisation message was not received within {}.",
                    seconds_phrase(settings.polling_timeout)
                ),
            ))
        };

        loop {
            if Instant::now() >= deadline {
                break overall_timeout();
            }

            let attempt = {
                let mut state = self.lock();
                state.polls_sent += 1;
                state.polls_sent
            };
            self.inner.context.metrics().poll_sent();
            debug!(attempt, "Sending polling request");

            let transfer = tokio::select! {
                biased;
                _ = cancelled.wait_for(|c| *c) => break Terminal::Cancelled,
                _ = sleep_until(deadline) => break overall_timeout(),
                transfer = with_timeout(settings.polling_request_timeout, send(&client, &prepared)) => transfer,
            };

            match transfer {
                Transfer::TimedOut => {
                    let timeouts = {
                        let mut state = self.lock();
                        state.consecutive_timeouts += 1;
                        state.consecutive_timeouts
                    };

                    if timeouts >= settings.max_consecutive_timeouts {
                        warn!(timeouts, "Too many polling requests timed out in a row");
                        break Terminal::TimedOut(Error::timeout(
                            settings.polling_request_timeout,
                            &prepared.url,
                        ));
                    }
                    debug!(timeouts, "Polling request timed out, trying again");
                }
                Transfer::Completed { status: 404, .. } => {
                    self.lock().consecutive_timeouts = 0;
                    debug!(
                        interval = ?settings.polling_interval,
                        "Authorization not yet granted, polling again"
                    );

                    tokio::select! {
                        biased;
                        _ = cancelled.wait_for(|c| *c) => break Terminal::Cancelled,
                        _ = sleep_until(deadline) => break overall_timeout(),
                        _ = sleep(settings.polling_interval) => {}
                    }
                }
                Transfer::Completed { status: 200, body } => {
                    self.lock().consecutive_timeouts = 0;
                    break self.accept_credentials(body, configuration, sink);
                }
                Transfer::Completed { status, .. } => {
                    self.lock().consecutive_timeouts = 0;
                    let failure = Failure::Status(status);
                    break Terminal::Failed {
                        error: Error::from_failure(&failure, &prepared.url),
                        reported: false,
                    };
                }
                Transfer::Failed(failure) => {
                    break Terminal::Failed {
                        error: Error::from_failure(&failure, &prepared.url),
                        reported: false,
                    };
                }
            }
        }
    }

    fn accept_credentials(
        &self,
        body: Bytes,
        configuration: &dyn Configuration,
        sink: Option<&dyn CredentialsSink>,
    ) -> Terminal {
        debug!("Authorization granted, storing credentials");

        let accepted = match sink {
            Some(sink) => sink.accept_credentials(&body),
            None => configuration.set_login_flow_credentials(&body),
        };

        if !accepted {
            return Terminal::Failed {
                error: Error::critical(ErrorKind::Output, "The returned login data is invalid."),
                reported: false,
            };
        }

        let host = format!("{}{}", configuration.host(), configuration.install_path());
        self.inner.context.notify(Notification::new(
            NotificationKind::AuthorizationSucceeded,
            Severity::Info,
            json!({"username": configuration.username(), "host": host}),
        ));

        Terminal::Succeeded(serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn finish(&self, terminal: Terminal, configuration: &dyn Configuration) -> Outcome<Value> {
        let (phase, outcome) = match terminal {
            Terminal::Succeeded(credentials) => {
                info!(username = %configuration.username(), "Login flow succeeded");
                let _ = self
                    .inner
                    .events
                    .send(LoginFlowEvent::Succeeded(credentials.clone()));
                (LoginPhase::Succeeded, Outcome::Succeeded(credentials))
            }
            Terminal::Failed { error, reported } => {
                (LoginPhase::Failed, self.report_failure(error, reported))
            }
            Terminal::TimedOut(error) => (LoginPhase::TimedOut, self.report_failure(error, false)),
            Terminal::Cancelled => {
                debug!("Login flow cancelled");
                (LoginPhase::Cancelled, Outcome::Cancelled)
            }
        };

        let mut state = self.lock();
        state.phase = phase;
        state.deadline = None;
        self.inner.seconds_left.send_replace(0);
        if let Outcome::Failed(error) = &outcome {
            state.last_error = Some(error.clone());
        }
        outcome
    }

    fn report_failure(&self, error: Error, reported: bool) -> Outcome<Value> {
        error!(kind = ?error.kind(), data = error.data().unwrap_or_default(), "{}", error.message());
        if !reported {
            self.inner.context.notify_error(&error);
        }
        let _ = self.inner.events.send(LoginFlowEvent::Failed(error.clone()));
        Outcome::Failed(error)
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LoginFlow")
            .field("phase", &state.phase)
            .field("settings", &state.settings)
            .field("polls_sent", &state.polls_sent)
            .finish_non_exhaustive()
    }
}

/// `token=<token>` form post to the polling endpoint
fn polling_request(grant: &LoginGrant, configuration: &dyn Configuration) -> PreparedRequest {
    let payload = Payload::form(&[("token", grant.token.as_str())]);
    let descriptor = RequestDescriptor::post(grant.endpoint.path())
        .requires_auth(false)
        .check_for_wipe(false)
        .payload(payload.clone());

    PreparedRequest {
        method: descriptor.method,
        url: grant.endpoint.to_string(),
        headers: build_headers(
            &descriptor,
            configuration,
            &configuration.login_flow_user_agent(),
        ),
        body: Some(payload.bytes),
    }
}

/// Publishes the seconds left once per second until dropped
struct Countdown(JoinHandle<()>);

impl Countdown {
    fn start(seconds_left: watch::Sender<u64>, deadline: Instant) -> Self {
        let period = Duration::from_secs(1);
        seconds_left.send_replace(deadline.saturating_duration_since(Instant::now()).as_secs());
        Self(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                let left = deadline.saturating_duration_since(Instant::now()).as_secs();
                seconds_left.send_replace(left);
            }
        }))
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Leaves the flow cancelled if `start` is dropped mid-run
struct PhaseGuard<'a> {
    flow: &'a LoginFlow,
    armed: bool,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.flow.lock();
            if state.phase.is_running() {
                state.phase = LoginPhase::Cancelled;
                state.deadline = None;
                self.flow.inner.seconds_left.send_replace(0);
            }
        }
    }
}
