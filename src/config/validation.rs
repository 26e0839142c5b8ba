use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Server host '{host}' must be a plain host name without scheme or path")]
    InvalidHost { host: String },

    #[error("Install path '{path}' must not contain a query or fragment")]
    InvalidInstallPath { path: String },

    #[error("Login flow setting must be positive: {field} = {value}")]
    InvalidLoginFlowSetting { field: String, value: u64 },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_login_flow(config)?;
    Ok(())
}

/// An empty host is allowed here, it is filled in by the login flow
fn validate_server(config: &Config) -> Result<(), ValidationError> {
    let host = &config.server.host;
    if host.contains("://") || host.contains('/') {
        return Err(ValidationError::InvalidHost { host: host.clone() });
    }

    let path = &config.server.install_path;
    if path.contains('?') || path.contains('#') {
        return Err(ValidationError::InvalidInstallPath { path: path.clone() });
    }

    Ok(())
}

fn validate_login_flow(config: &Config) -> Result<(), ValidationError> {
    let flow = &config.login_flow;
    let checks = [
        ("polling_interval", flow.polling_interval.as_secs()),
        ("polling_timeout", flow.polling_timeout.as_secs()),
        ("polling_request_timeout", flow.polling_request_timeout.as_secs()),
        ("max_consecutive_timeouts", u64::from(flow.max_consecutive_timeouts)),
    ];

    for (field, value) in checks {
        if value == 0 {
            return Err(ValidationError::InvalidLoginFlowSetting {
                field: field.to_string(),
                value,
            });
        }
    }

    Ok(())
}
