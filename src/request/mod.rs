//! Generic request lifecycle
//!
//! A [`Request`] owns one [`Endpoint`] strategy and executes it against the
//! server at most once at a time:
//!
//! ```text
//! Idle --execute()--> InFlight --(reply | timeout | input error)--> Succeeded | Failed
//!                        \--cancel()--> Cancelled
//! ```
//!
//! Every finished execution calls exactly one of the endpoint's success or
//! failure hooks; a cancelled execution calls neither. Calling `execute`
//! while a previous call is still in flight is rejected without touching
//! the running call.

mod descriptor;
mod endpoint;

pub use descriptor::{
    ApiBase, DEFAULT_TIMEOUT, ExpectedShape, Method, NEWS_API_PATH, Payload, PreparedRequest,
    RequestDescriptor, build_headers, build_url, check_host, check_input, check_payload, check_shape,
    prepare,
};
pub use endpoint::{ApiResponse, Endpoint};

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::context::Context;
use crate::error::{Error, Failure, TransportFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    InFlight,
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of one call to [`Request::execute`]
#[derive(Debug)]
pub enum Outcome<T> {
    Succeeded(T),
    Failed(Error),
    /// [`Request::cancel`] was called while in flight
    Cancelled,
    /// Another execution was already in flight, nothing was done
    Rejected,
}

impl<T> Outcome<T> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn succeeded(self) -> Option<T> {
        match self {
            Outcome::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    /// The success value, or this outcome carried over to another output type
    pub fn into_value<U>(self) -> Result<T, Outcome<U>> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(error) => Err(Outcome::Failed(error)),
            Outcome::Cancelled => Err(Outcome::Cancelled),
            Outcome::Rejected => Err(Outcome::Rejected),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Succeeded(value) => Outcome::Succeeded(f(value)),
            Outcome::Failed(error) => Outcome::Failed(error),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Rejected => Outcome::Rejected,
        }
    }
}

struct Shared<E> {
    endpoint: E,
    state: RequestState,
    last_error: Option<Error>,
    raw_response: Option<Bytes>,
    json: Option<Value>,
}

struct Inner<E> {
    context: Context,
    configuration: Option<Arc<dyn Configuration>>,
    shared: Mutex<Shared<E>>,
    cancel: watch::Sender<bool>,
}

/// Handle to a single API call
///
/// Clones share the same state, so one clone can `cancel()` while another
/// awaits `execute()`.
pub struct Request<E: Endpoint> {
    inner: Arc<Inner<E>>,
}

impl<E: Endpoint> Clone for Request<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) enum Transfer {
    Completed { status: u16, body: Bytes },
    Failed(Failure),
    TimedOut,
}

impl<E: Endpoint> Request<E> {
    /// Request using the configuration of `context`
    pub fn new(endpoint: E, context: Context) -> Self {
        Self::build(endpoint, context, None)
    }

    /// Request using its own configuration instead of the context's
    pub fn with_configuration(
        endpoint: E,
        context: Context,
        configuration: Arc<dyn Configuration>,
    ) -> Self {
        Self::build(endpoint, context, Some(configuration))
    }

    fn build(endpoint: E, context: Context, configuration: Option<Arc<dyn Configuration>>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                context,
                configuration,
                shared: Mutex::new(Shared {
                    endpoint,
                    state: RequestState::Idle,
                    last_error: None,
                    raw_response: None,
                    json: None,
                }),
                cancel,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<E>> {
        self.inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configuration this request is executed with
    pub fn configuration(&self) -> Arc<dyn Configuration> {
        self.inner
            .configuration
            .clone()
            .unwrap_or_else(|| Arc::clone(self.inner.context.configuration()))
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    pub fn is_in_flight(&self) -> bool {
        self.state() == RequestState::InFlight
    }

    pub fn last_error(&self) -> Option<Error> {
        self.lock().last_error.clone()
    }

    /// Body of the last reply, set whenever the transport delivered one
    pub fn raw_response(&self) -> Option<Bytes> {
        self.lock().raw_response.clone()
    }

    /// Parsed body of the last reply, if a JSON body was expected
    pub fn json(&self) -> Option<Value> {
        self.lock().json.clone()
    }

    /// Inspect the endpoint, e.g. to read what its hooks stored
    pub fn with_endpoint<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.lock().endpoint)
    }

    /// Abort an in-flight execution. No hook fires and `execute` resolves
    /// to [`Outcome::Cancelled`]. Does nothing when idle.
    pub fn cancel(&self) {
        let shared = self.lock();
        if shared.state == RequestState::InFlight {
            debug!("Cancelling request");
            self.inner.cancel.send_replace(true);
        }
    }

    /// Perform the request
    pub async fn execute(&self) -> Outcome<E::Output> {
        let configuration = self.configuration();

        let (descriptor, mut cancelled) = {
            let mut shared = self.lock();
            if shared.state == RequestState::InFlight {
                warn!("Request is still in operation, ignoring execute");
                self.inner.context.metrics().request_rejected();
                return Outcome::Rejected;
            }

            shared.state = RequestState::InFlight;
            shared.last_error = None;
            shared.raw_response = None;
            shared.json = None;
            self.inner.cancel.send_replace(false);
            (shared.endpoint.descriptor(), self.inner.cancel.subscribe())
        };

        let request_id = Uuid::new_v4();
        let span = info_span!(
            "request",
            %request_id,
            method = %descriptor.method,
            route = %descriptor.route
        );

        async move {
            // Leaves the request cancelled if this future is dropped mid-flight
            let mut guard = InFlightGuard {
                request: self,
                armed: true,
            };
            self.inner.context.metrics().request_started();

            let checked = self.with_endpoint(|endpoint| {
                endpoint.check_input(&descriptor, configuration.as_ref())
            });
            if let Err(error) = checked {
                guard.armed = false;
                return self.fail(error);
            }

            let prepared = match prepare(&descriptor, configuration.as_ref(), &configuration.user_agent()) {
                Ok(prepared) => prepared,
                Err(error) => {
                    guard.armed = false;
                    return self.fail(error);
                }
            };

            let timeout = descriptor
                .timeout
                .unwrap_or_else(|| configuration.request_timeout());
            debug!(url = %prepared.url, ?timeout, "Starting request");
            let client = self.inner.context.client_for(configuration.as_ref());

            let transfer = tokio::select! {
                biased;
                _ = cancelled.wait_for(|c| *c) => None,
                transfer = with_timeout(timeout, send(&client, &prepared)) => Some(transfer),
            };
            guard.armed = false;

            match transfer {
                None => self.finish_cancelled(),
                Some(Transfer::TimedOut) => {
                    warn!(url = %prepared.url, ?timeout, "Request timed out");
                    self.inner.context.metrics().request_timed_out();
                    self.fail(Error::timeout(timeout, &prepared.url))
                }
                Some(Transfer::Failed(failure)) => {
                    let error = self.with_endpoint(|endpoint| {
                        endpoint.map_error(&failure, Error::from_failure(&failure, &prepared.url))
                    });
                    self.fail(error)
                }
                Some(Transfer::Completed { status, body }) => {
                    self.finish_reply(&descriptor, &prepared.url, status, body, configuration.as_ref())
                }
            }
        }
        .instrument(span)
        .await
    }

    fn finish_reply(
        &self,
        descriptor: &RequestDescriptor,
        url: &str,
        status: u16,
        body: Bytes,
        configuration: &dyn Configuration,
    ) -> Outcome<E::Output> {
        debug!(status, bytes = body.len(), "Request finished");
        self.lock().raw_response = Some(body.clone());

        if !(200..300).contains(&status) {
            let failure = Failure::Status(status);
            let error = self.with_endpoint(|endpoint| {
                endpoint.map_error(&failure, Error::from_failure(&failure, url))
            });
            let outcome = self.fail(error);
            if descriptor.check_for_wipe && matches!(status, 401 | 403) {
                self.inner.context.check_for_wipe();
            }
            return outcome;
        }

        let json = match check_shape(descriptor.expected, &body) {
            Ok(json) => json,
            Err(error) => return self.fail(error),
        };

        let response = ApiResponse { status, body, json };

        let mut shared = self.lock();
        shared.json = response.json.clone();

        let output = match shared.endpoint.check_output(&response) {
            Ok(output) => output,
            Err(error) => {
                drop(shared);
                return self.fail(error);
            }
        };

        shared.endpoint.on_success(&output, configuration);
        shared.state = RequestState::Succeeded;
        drop(shared);

        self.inner.context.metrics().request_succeeded();
        Outcome::Succeeded(output)
    }

    fn fail(&self, error: Error) -> Outcome<E::Output> {
        error!(kind = ?error.kind(), data = error.data().unwrap_or_default(), "{}", error.message());

        {
            let mut shared = self.lock();
            shared.endpoint.on_failure(&error);
            shared.last_error = Some(error.clone());
            shared.state = RequestState::Failed;
        }

        self.inner.context.metrics().request_failed();
        self.inner.context.notify_error(&error);
        Outcome::Failed(error)
    }

    fn finish_cancelled(&self) -> Outcome<E::Output> {
        debug!("Request cancelled");
        self.lock().state = RequestState::Cancelled;
        self.inner.context.metrics().request_cancelled();
        Outcome::Cancelled
    }
}

struct InFlightGuard<'a, E: Endpoint> {
    request: &'a Request<E>,
    armed: bool,
}

impl<E: Endpoint> Drop for InFlightGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            let mut shared = self.request.lock();
            if shared.state == RequestState::InFlight {
                shared.state = RequestState::Cancelled;
            }
        }
    }
}

/// Send a prepared request and read the full body
pub(crate) async fn send(client: &Client, prepared: &PreparedRequest) -> Result<(u16, Bytes), Failure> {
    let mut builder = client.request(prepared.method.into(), prepared.url.as_str());

    for (name, value) in &prepared.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    if let Some(body) = &prepared.body {
        builder = builder.body(body.clone());
    }

    let response = builder
        .send()
        .await
        .map_err(|e| Failure::Transport(TransportFailure::from_reqwest(&e)))?;

    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| Failure::Transport(TransportFailure::from_reqwest(&e)))?;

    Ok((status, body))
}

/// `Duration::ZERO` waits forever
pub(crate) async fn with_timeout<F>(timeout: Duration, transfer: F) -> Transfer
where
    F: Future<Output = Result<(u16, Bytes), Failure>>,
{
    let result = if timeout.is_zero() {
        transfer.await
    } else {
        match tokio::time::timeout(timeout, transfer).await {
            Ok(result) => result,
            Err(_) => return Transfer::TimedOut,
        }
    };

    match result {
        Ok((status, body)) => Transfer::Completed { status, body },
        Err(failure) => Transfer::Failed(failure),
    }
}
