//! News API endpoints used by the account workflows

mod status;
mod user;
mod version;

pub use status::{GetStatus, ServerStatus};
pub use user::{GetUser, UserInfo};
pub use version::GetVersion;

use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind};
use crate::request::ApiResponse;

/// The reply object, the shape check already made sure it is one
fn reply_object(response: &ApiResponse) -> Result<&Map<String, Value>, Error> {
    response.json().as_object().ok_or_else(|| {
        Error::critical(
            ErrorKind::Output,
            "It was expected that the request returns a JSON object, but it returned something else.",
        )
    })
}

fn missing_field(message: &str) -> Error {
    Error::critical(ErrorKind::Output, message)
}
