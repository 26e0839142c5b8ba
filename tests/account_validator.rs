//! Version, status and user chain against the mock server

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockServer, NEWS_API, RecordingNotificator, Reply};
use newsbridge::config::Account;
use newsbridge::error::{ErrorKind, Severity};
use newsbridge::{AccountValidator, Configuration, Context, Version};
use serde_json::json;

fn version_path() -> String {
    format!("{NEWS_API}/version")
}

fn status_path() -> String {
    format!("{NEWS_API}/status")
}

fn user_path() -> String {
    format!("{NEWS_API}/user")
}

async fn setup() -> (MockServer, Arc<Account>, AccountValidator, Arc<RecordingNotificator>) {
    let server = MockServer::start().await;
    let account = Arc::new(server.account());
    let notificator = Arc::new(RecordingNotificator::default());
    let context = Context::new(account.clone())
        .unwrap()
        .with_notificator(notificator.clone());
    (server, account, AccountValidator::new(context), notificator)
}

#[tokio::test]
async fn test_full_chain() {
    let (server, account, validator, notificator) = setup().await;
    server.script(&version_path(), vec![Reply::json(200, json!({"version": "18.1.0"}))]);
    server.script(
        &status_path(),
        vec![Reply::json(
            200,
            json!({"version": "18.1.0", "warnings": {"improperlyConfiguredCron": false}}),
        )],
    );
    server.script(
        &user_path(),
        vec![Reply::json(
            200,
            json!({
                "userId": "alice",
                "displayName": "Alice",
                "lastLoginTimestamp": 1700000000,
                "avatar": null
            }),
        )],
    );

    let report = validator.validate().await.succeeded().unwrap();

    assert_eq!(report.version, Version::new(18, 1, 0));
    assert!(report.status.is_some());
    assert_eq!(report.user.map(|u| u.display_name), Some("Alice".to_string()));
    assert!(report.warning.is_none());

    assert_eq!(account.server_version(), Some(Version::new(18, 1, 0)));
    assert_eq!(account.display_name().as_deref(), Some("Alice"));
    assert_eq!(notificator.count(), 0);
}

#[tokio::test]
async fn test_old_version_stops_before_status() {
    let (server, _, validator, _) = setup().await;
    server.script(&version_path(), vec![Reply::json(200, json!({"version": "5.2.3"}))]);

    let report = validator.validate().await.succeeded().unwrap();

    let warning = report.warning.unwrap();
    assert_eq!(warning.kind(), ErrorKind::Server);
    assert_eq!(warning.severity(), Severity::Warning);
    assert_eq!(
        warning.message(),
        "The version of your News App is lower than 5.2.4. Status and user information can not be queried."
    );
    assert_eq!(warning.data(), Some("5.2.3"));
    assert!(report.status.is_none());
    assert_eq!(server.hits(&status_path()), 0);
    assert_eq!(server.hits(&user_path()), 0);
}

#[tokio::test]
async fn test_old_version_stops_before_user() {
    let (server, account, validator, _) = setup().await;
    server.script(&version_path(), vec![Reply::json(200, json!({"version": "6.0.0"}))]);
    server.script(
        &status_path(),
        vec![Reply::json(
            200,
            json!({"version": "6.0.0", "warnings": {"improperlyConfiguredCron": true}}),
        )],
    );

    let report = validator.validate().await.succeeded().unwrap();

    assert!(report.status.is_some());
    assert!(report.user.is_none());
    assert_eq!(report.warning.as_ref().and_then(|w| w.data()), Some("6.0.0"));
    assert!(account.improperly_configured_cron());
    assert_eq!(server.hits(&user_path()), 0);
}

#[tokio::test]
async fn test_critical_failure_aborts_chain() {
    let (server, _, validator, notificator) = setup().await;
    server.script(&version_path(), vec![Reply::json(200, json!({"version": "18.0.0"}))]);
    server.script(&status_path(), vec![Reply::json(200, json!({"version": "18.0.0"}))]);

    let outcome = validator.validate().await;

    let error = outcome.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::Output);
    assert!(error.severity().aborts());
    assert_eq!(server.hits(&user_path()), 0);
    assert_eq!(notificator.count(), 1);
    assert!(!validator.is_running());
}

#[tokio::test]
async fn test_unauthorized() {
    let (server, _, validator, _) = setup().await;
    server.script(&version_path(), vec![Reply::status(401)]);

    let outcome = validator.validate().await;
    assert_eq!(outcome.error().map(|e| e.kind()), Some(ErrorKind::Authorization));
    assert_eq!(server.hits(&status_path()), 0);
}

#[tokio::test]
async fn test_dropped_validation_can_run_again() {
    let (server, _, validator, _) = setup().await;
    server.script(
        &version_path(),
        vec![
            Reply::json(200, json!({"version": "5.2.3"})).delayed(Duration::from_millis(500)),
            Reply::json(200, json!({"version": "5.2.3"})),
        ],
    );

    let dropped = tokio::time::timeout(Duration::from_millis(50), validator.validate()).await;
    assert!(dropped.is_err());
    assert!(!validator.is_running());

    let report = validator.validate().await.succeeded().unwrap();
    assert_eq!(report.version, Version::new(5, 2, 3));
    assert_eq!(server.hits(&version_path()), 2);
}
