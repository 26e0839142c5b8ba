//! User facing notifications
//!
//! Requests and the login flow report failures and a few noteworthy
//! successes to an optional [`Notificator`] held by the [`crate::Context`].
//! Applications plug in their own implementation to show desktop
//! notifications or banners; [`TracingNotificator`] just logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::error::{Error, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A request or login flow failed, `data` holds `message` and `data` of the error
    RequestFailed,
    /// A login flow finished, `data` holds `username` and `host`
    AuthorizationSucceeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, severity: Severity, data: Value) -> Self {
        Self {
            kind,
            severity,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn from_error(error: &Error) -> Self {
        Self::new(
            NotificationKind::RequestFailed,
            error.severity(),
            json!({"message": error.message(), "data": error.data()}),
        )
    }
}

pub trait Notificator: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificator;

impl Notificator for TracingNotificator {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => info!(kind = ?notification.kind, data = %notification.data, "Notification"),
            Severity::Warning => warn!(kind = ?notification.kind, data = %notification.data, "Notification"),
            Severity::Critical | Severity::Fatal => {
                error!(kind = ?notification.kind, data = %notification.data, "Notification")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_from_error() {
        let error = Error::critical(ErrorKind::Output, "broken reply");
        let notification = Notification::from_error(&error);

        assert_eq!(notification.kind, NotificationKind::RequestFailed);
        assert_eq!(notification.severity, Severity::Critical);
        assert_eq!(notification.data["message"], "broken reply");
        assert!(notification.data["data"].is_null());
    }

    #[test]
    fn test_serializes_kind_in_snake_case() {
        let notification = Notification::new(
            NotificationKind::AuthorizationSucceeded,
            Severity::Info,
            json!({"username": "bob", "host": "cloud"}),
        );
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["kind"], "authorization_succeeded");
        assert_eq!(json["severity"], "info");
        assert_eq!(json["data"]["username"], "bob");
    }
}
