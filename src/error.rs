//! Error value object shared by every API operation
//!
//! Failures are never raised as control flow. Each failed operation produces
//! exactly one [`Error`] that is handed back through the same channel as a
//! success (see [`crate::request::Outcome`]). Network and server failures are
//! classified centrally by [`classify`], so every endpoint reports the same
//! message for the same HTTP status code.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Broad category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport level failure or a 4xx reply
    Request,
    /// The reply body was not valid JSON
    JsonParsing,
    /// Local validation of the request failed before any I/O
    Input,
    /// The reply did not have the expected content
    Output,
    /// 5xx replies and server side problems
    Server,
    Application,
    Storage,
    /// 401/403 replies
    Authorization,
}

/// How bad a failure is
///
/// `Warning` and `Info` do not abort a larger workflow, `Critical` and
/// `Fatal` do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Fatal,
}

impl Severity {
    pub fn aborts(self) -> bool {
        matches!(self, Severity::Critical | Severity::Fatal)
    }
}

/// A single failure: kind, severity, human readable message and optional
/// auxiliary data such as the offending URL or raw server text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    severity: Severity,
    message: String,
    data: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            data: None,
        }
    }

    /// Shorthand for the most common case, a critical failure
    pub fn critical(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Critical, message)
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        let data = data.into();
        self.data = if data.is_empty() { None } else { Some(data) };
        self
    }

    /// Build an error from a classified network failure against `url`
    pub fn from_failure(failure: &Failure, url: &str) -> Self {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let (kind, message) = classify(failure, &host);
        Self::critical(kind, message).with_data(url)
    }

    pub fn json_parsing(err: &serde_json::Error) -> Self {
        Self::critical(ErrorKind::JsonParsing, format!("JSON parsing error: {err}"))
    }

    /// A request that did not finish within `timeout`
    pub fn timeout(timeout: Duration, url: &str) -> Self {
        Self::critical(
            ErrorKind::Request,
            format!(
                "The connection to the server timed out after {}.",
                seconds_phrase(timeout)
            ),
        )
        .with_data(url)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }
}

/// "1 second" / "5 seconds"; sub-second durations are rounded up
pub(crate) fn seconds_phrase(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs = secs.saturating_add(1);
    }
    if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{secs} seconds")
    }
}

/// What went wrong on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The server answered with a non-success HTTP status
    Status(u16),
    /// No usable HTTP answer was received
    Transport(TransportFailure),
}

/// Transport error categories, independent of the HTTP client in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    ConnectionRefused,
    RemoteHostClosed,
    HostNotFound,
    Timeout,
    Cancelled,
    TlsHandshake,
    TooManyRedirects,
    Protocol,
    Body,
    Builder,
    Unknown,
}

impl TransportFailure {
    /// Map a reqwest error onto a transport category
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportFailure::Timeout;
        }
        if err.is_redirect() {
            return TransportFailure::TooManyRedirects;
        }
        if err.is_builder() {
            return TransportFailure::Builder;
        }

        if let Some(kind) = io_error_kind(err) {
            use std::io::ErrorKind as Io;
            match kind {
                Io::ConnectionRefused => return TransportFailure::ConnectionRefused,
                Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe | Io::UnexpectedEof => {
                    return TransportFailure::RemoteHostClosed;
                }
                Io::TimedOut => return TransportFailure::Timeout,
                _ => {}
            }
        }

        let chain = error_chain_text(err).to_lowercase();
        if chain.contains("dns error")
            || chain.contains("failed to lookup address")
            || chain.contains("name or service not known")
        {
            return TransportFailure::HostNotFound;
        }
        if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
            return TransportFailure::TlsHandshake;
        }
        if chain.contains("connection closed") || chain.contains("incomplete message") {
            return TransportFailure::RemoteHostClosed;
        }

        if err.is_body() || err.is_decode() {
            TransportFailure::Body
        } else if err.is_request() {
            TransportFailure::Protocol
        } else {
            TransportFailure::Unknown
        }
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = current.source();
    }
    None
}

fn error_chain_text(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(current) = source {
        text.push_str(": ");
        text.push_str(&current.to_string());
        source = current.source();
    }
    text
}

const UNKNOWN_NETWORK_ERROR: &str = "An unknown network-related error was detected.";

/// Classify a failure into an error kind and a human readable message.
///
/// Total: every input yields a message, unknown codes fall back to the
/// generic network error text. `host` is interpolated into the messages of
/// connection level failures.
pub fn classify(failure: &Failure, host: &str) -> (ErrorKind, String) {
    match *failure {
        Failure::Status(code) => {
            let kind = match code {
                401 | 403 => ErrorKind::Authorization,
                500..=599 => ErrorKind::Server,
                _ => ErrorKind::Request,
            };
            let message = status_message(code).unwrap_or(UNKNOWN_NETWORK_ERROR);
            (kind, message.to_string())
        }
        Failure::Transport(transport) => {
            let message = match transport {
                TransportFailure::ConnectionRefused => {
                    format!("The remote server at {host} refused the connection.")
                }
                TransportFailure::RemoteHostClosed => format!(
                    "The remote server at {host} closed the connection prematurely, before the entire reply was received and processed."
                ),
                TransportFailure::HostNotFound => {
                    format!("The remote host name {host} was not found.")
                }
                TransportFailure::Timeout => {
                    format!("The connection to the server at {host} timed out.")
                }
                TransportFailure::Cancelled => {
                    "The operation was canceled before it was finished.".to_string()
                }
                TransportFailure::TlsHandshake => {
                    "The SSL/TLS handshake failed and the encrypted channel could not be established."
                        .to_string()
                }
                TransportFailure::TooManyRedirects => {
                    "While following redirects, the maximum limit was reached.".to_string()
                }
                TransportFailure::Protocol => {
                    "A breakdown in protocol was detected (parsing error, invalid or unexpected responses, etc.)."
                        .to_string()
                }
                TransportFailure::Body => {
                    "The reply of the server could not be read completely.".to_string()
                }
                TransportFailure::Builder => {
                    "The network request could not be constructed.".to_string()
                }
                TransportFailure::Unknown => UNKNOWN_NETWORK_ERROR.to_string(),
            };
            (ErrorKind::Request, message)
        }
    }
}

fn status_message(code: u16) -> Option<&'static str> {
    let message = match code {
        400 => "Bad request — The server cannot or will not process the request due to an apparent client error.",
        401 => "Unauthorized — You need to provide authentication credentials to perform the request.",
        403 => "Forbidden — You might not have the necessary permissions to perform this action.",
        404 => "Not found — The requested resource can not be found on the server.",
        405 => "Method not allowed — The used method is not allowed for the requested resource.",
        406 => "Not acceptable — The requested resource is capable of generating only content not acceptable according to the Accept headers sent in the request.",
        407 => "Proxy authentication required — The client must first authenticate itself with the proxy server.",
        408 => "Request timeout — The server timed out waiting for the request.",
        409 => "Conflict — The request could not be processed because of conflict in the request, such as an edit conflict between multiple simultaneous updates.",
        410 => "Gone — The resource requested is no longer available.",
        411 => "Length required — The request did not specify the length of its content, which is required by the requested resource.",
        412 => "Precondition failed — The server does not meet one of the preconditions that the requester put on the request.",
        413 => "Payload too large — The request is larger than the server is willing or able to process.",
        414 => "URI too long — The URI provided was too long for the server to process.",
        415 => "Unsupported media type — The request entity has a media type which the server or resource does not support.",
        416 => "Range not satisfiable — The client has asked for a portion of the resource, but the server cannot supply that portion.",
        417 => "Expectation failed — The server cannot meet the requirements of the Expect request-header field.",
        421 => "Misdirected request — The request was directed at a server that is not able to produce a response.",
        426 => "Upgrade required — The client should switch to a different protocol.",
        428 => "Precondition required — The origin server requires the request to be conditional.",
        429 => "Too many requests — The user has sent too many requests in a given amount of time.",
        431 => "Request header fields too large — The server is unwilling to process the request because either an individual header field, or all the header fields collectively, are too large.",
        500 => "Internal server error — An unexpected condition was encountered on the server.",
        501 => "Not implemented — The server either does not recognize the request method, or it lacks the ability to fulfill the request.",
        502 => "Bad gateway — The gateway or proxy received an invalid response from the upstream server.",
        503 => "Service unavailable — The server is currently unavailable (because it is overloaded or down for maintenance).",
        504 => "Gateway timeout — The gateway or proxy did not receive a timely response from the upstream server.",
        505 => "HTTP version not supported — The server does not support the HTTP protocol version used in the request.",
        506 => "Variant also negotiates — Transparent content negotiation for the request results in a circular reference.",
        509 => "Bandwidth limit exceeded — The request could not be processed because it would exceed the bandwidth limit of the server.",
        510 => "Not extended — Further extensions to the request are required for the server to fulfil it.",
        511 => "Network authentication required — The client needs to authenticate to gain network access.",
        _ => return None,
    };
    Some(message)
}
