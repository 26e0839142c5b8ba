//! In-process mock of the Nextcloud endpoints used by the integration tests
//!
//! Every path has a script of replies. Replies are consumed in order and the
//! last one repeats, so a path scripted with `[404, 404, 200]` answers every
//! request after the third with 200.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use newsbridge::config::Account;
use newsbridge::WipeHandler;
use newsbridge::notify::{Notification, Notificator};
use serde_json::{Value, json};

pub const NEWS_API: &str = "/index.php/apps/news/api/v1-2";
pub const LOGIN_PATH: &str = "/index.php/login/v2";
pub const POLL_PATH: &str = "/login/v2/poll";

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One request as the mock saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    recorded: Mutex<Vec<Recorded>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn script(&self, path: &str, replies: Vec<Reply>) {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(path.to_string(), replies.into());
    }

    /// Script the initial login flow reply pointing the poller back here
    pub fn script_login(&self, token: &str) {
        let base = self.base_url();
        self.script(
            LOGIN_PATH,
            vec![Reply::json(
                200,
                json!({
                    "login": format!("{base}/login/v2/flow/abc"),
                    "poll": {"token": token, "endpoint": format!("{base}{POLL_PATH}")}
                }),
            )],
        );
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.state
            .recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    pub fn total_hits(&self) -> usize {
        self.state.recorded.lock().unwrap().len()
    }

    /// Account pointing at this server over plain HTTP
    pub fn account(&self) -> Account {
        let account = Account::new();
        account.set_host(self.addr.ip().to_string());
        account.set_server_port(self.addr.port());
        account.set_use_ssl(false);
        account.set_username("alice");
        account.set_password("secret");
        account
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    state.recorded.lock().unwrap().push(Recorded {
        method,
        path: path.clone(),
        headers,
        body,
    });

    let reply = {
        let mut scripts = state.scripts.lock().unwrap();
        match scripts.get_mut(&path) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        }
    };

    let Some(reply) = reply else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    (
        StatusCode::from_u16(reply.status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response()
}

/// Collects notifications for assertions
#[derive(Default)]
pub struct RecordingNotificator {
    pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotificator {
    pub fn count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Notificator for RecordingNotificator {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Counts remote wipe checks
#[derive(Default)]
pub struct WipeCounter {
    checks: AtomicUsize,
}

impl WipeCounter {
    pub fn count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl WipeHandler for WipeCounter {
    fn check_for_wipe(&self) {
        self.checks.fetch_add(1, Ordering::SeqCst);
    }
}
