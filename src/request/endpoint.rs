use bytes::Bytes;
use serde_json::Value;

use super::descriptor::{self, RequestDescriptor};
use crate::config::Configuration;
use crate::error::{Error, Failure};

/// A reply that made it through the transport with a 2xx status
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
    /// Only set when the descriptor expects a JSON body
    pub json: Option<Value>,
}

impl ApiResponse {
    /// The parsed body, `Value::Null` if none was expected
    pub fn json(&self) -> &Value {
        self.json.as_ref().unwrap_or(&Value::Null)
    }
}

/// Per-endpoint strategy consumed by [`super::Request`]
///
/// An endpoint describes its call, turns a reply into its output value and
/// may react to the outcome. The input check and error mapping default to
/// the generic behaviour.
pub trait Endpoint: Send + 'static {
    /// Value delivered by a successful execution
    type Output: Send + 'static;

    fn descriptor(&self) -> RequestDescriptor;

    /// Validation before any network I/O
    fn check_input(
        &self,
        descriptor: &RequestDescriptor,
        configuration: &dyn Configuration,
    ) -> Result<(), Error> {
        descriptor::check_input(descriptor, configuration)
    }

    /// Validate a reply that already passed the shape check and extract the
    /// output from it
    fn check_output(&mut self, response: &ApiResponse) -> Result<Self::Output, Error>;

    /// Success hook, called at most once per execution. `configuration` is
    /// the one the request was executed with, server data is stored there.
    fn on_success(&mut self, _output: &Self::Output, _configuration: &dyn Configuration) {}

    /// Failure hook, called at most once per execution
    fn on_failure(&mut self, _error: &Error) {}

    /// Override the central classification of a network failure, e.g. to
    /// turn a 409 into an input error
    fn map_error(&self, _failure: &Failure, error: Error) -> Error {
        error
    }
}
