pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod humanize;
pub mod login_flow;
pub mod notify;
pub mod observability;
pub mod request;
pub mod validator;
pub mod version;

pub use config::{Account, Configuration, CredentialsSink};
pub use context::{Context, WipeHandler};
pub use error::{Error, ErrorKind, Severity};
pub use login_flow::{LoginFlow, LoginFlowEvent, LoginFlowSettings, LoginPhase};
pub use request::{Endpoint, Outcome, Request, RequestDescriptor, RequestState};
pub use validator::{AccountReport, AccountValidator};
pub use version::Version;
