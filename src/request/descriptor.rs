//! Declarative description of one API call and the pure functions that turn
//! it into an HTTP request and validate its reply.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use mime::Mime;
use serde_json::Value;

use crate::config::Configuration;
use crate::error::{Error, ErrorKind};

/// Path prefix of every News API route
pub const NEWS_API_PATH: &str = "/index.php/apps/news/api/v1-2";

/// Default timeout of a single request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    fn requires_payload(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        }
    }
}

/// Which prefix the route is appended to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiBase {
    /// `/index.php/apps/news/api/v1-2`
    #[default]
    NewsApi,
    /// Directly below the install path, e.g. `/status.php` or `/index.php/login/v2`
    Root,
}

impl ApiBase {
    pub fn path(self) -> &'static str {
        match self {
            ApiBase::NewsApi => NEWS_API_PATH,
            ApiBase::Root => "",
        }
    }
}

/// Expected shape of the reply body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedShape {
    /// The body is ignored, even if present
    #[default]
    None,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub bytes: Bytes,
    pub content_type: Mime,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>, content_type: Mime) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::new(value.to_string(), mime::APPLICATION_JSON)
    }

    /// `application/x-www-form-urlencoded`; keys and values are percent-encoded
    pub fn form(pairs: &[(&str, &str)]) -> Self {
        let body = reqwest::Url::parse_with_params("http://localhost/", pairs)
            .ok()
            .and_then(|url| url.query().map(str::to_string))
            .unwrap_or_default();
        Self::new(body, mime::APPLICATION_WWW_FORM_URLENCODED)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Everything needed to perform one API call
///
/// Set up once before execution and not changed while the request is in
/// flight.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub base: ApiBase,
    pub route: String,
    pub method: Method,
    pub payload: Option<Payload>,
    pub expected: ExpectedShape,
    pub requires_auth: bool,
    /// Merged over the computed headers, names compare case-insensitively
    pub headers: BTreeMap<String, String>,
    /// `None` falls back to the configuration, `Duration::ZERO` disables it
    pub timeout: Option<Duration>,
    pub query: Vec<(String, String)>,
    /// Ask the context's wipe handler on 401 and 403 replies
    pub check_for_wipe: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            base: ApiBase::NewsApi,
            route: route.into(),
            method,
            payload: None,
            expected: ExpectedShape::None,
            requires_auth: true,
            headers: BTreeMap::new(),
            timeout: None,
            query: Vec::new(),
            check_for_wipe: true,
        }
    }

    pub fn get(route: impl Into<String>) -> Self {
        Self::new(Method::Get, route)
    }

    pub fn post(route: impl Into<String>) -> Self {
        Self::new(Method::Post, route)
    }

    /// Also resets `check_for_wipe`, only News API routes check by default
    pub fn base(mut self, base: ApiBase) -> Self {
        self.base = base;
        self.check_for_wipe = base == ApiBase::NewsApi;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn expect(mut self, expected: ExpectedShape) -> Self {
        self.expected = expected;
        self
    }

    pub fn requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn check_for_wipe(mut self, check: bool) -> Self {
        self.check_for_wipe = check;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A fully resolved HTTP request, ready to hand to the client
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The generic checks run before any I/O
pub fn check_input(
    descriptor: &RequestDescriptor,
    configuration: &dyn Configuration,
) -> Result<(), Error> {
    check_host(configuration)?;

    if descriptor.base == ApiBase::NewsApi && descriptor.route.trim().is_empty() {
        return Err(Error::critical(ErrorKind::Input, "No API route specified."));
    }

    if descriptor.requires_auth
        && (configuration.username().is_empty() || configuration.password().is_empty())
    {
        return Err(Error::critical(
            ErrorKind::Input,
            "Username and password are required for this request.",
        ));
    }

    check_payload(descriptor)
}

pub fn check_host(configuration: &dyn Configuration) -> Result<(), Error> {
    if configuration.host().trim().is_empty() {
        return Err(Error::critical(
            ErrorKind::Input,
            "The server host is not configured.",
        ));
    }
    Ok(())
}

/// POST and PUT need a non-empty body
pub fn check_payload(descriptor: &RequestDescriptor) -> Result<(), Error> {
    if descriptor.method.requires_payload()
        && descriptor.payload.as_ref().is_none_or(Payload::is_empty)
    {
        return Err(Error::critical(
            ErrorKind::Input,
            format!("A {} request needs a payload.", descriptor.method),
        ));
    }
    Ok(())
}

/// `<scheme>://<host>[:<port>]<install path><base><route>[?query]`
pub fn build_url(
    descriptor: &RequestDescriptor,
    configuration: &dyn Configuration,
) -> Result<reqwest::Url, Error> {
    let scheme = if configuration.use_ssl() { "https" } else { "http" };
    let host = configuration.host();
    let authority = match configuration.server_port() {
        0 => host.trim().to_string(),
        port => format!("{}:{port}", host.trim()),
    };

    let install_path = configuration.install_path();
    let install_path = install_path.trim_end_matches('/');
    let separator = if install_path.is_empty() || install_path.starts_with('/') {
        ""
    } else {
        "/"
    };

    let raw = format!(
        "{scheme}://{authority}{separator}{install_path}{}{}",
        descriptor.base.path(),
        descriptor.route
    );

    let mut url = reqwest::Url::parse(&raw).map_err(|e| {
        Error::critical(ErrorKind::Input, format!("Invalid request URL: {e}")).with_data(&raw)
    })?;

    if !descriptor.query.is_empty() {
        url.query_pairs_mut().extend_pairs(descriptor.query.iter());
    }

    Ok(url)
}

/// Computed headers first, then the custom headers of the descriptor
/// replace or extend them.
pub fn build_headers(
    descriptor: &RequestDescriptor,
    configuration: &dyn Configuration,
    user_agent: &str,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![("User-Agent".to_string(), user_agent.to_string())];

    if let Some(payload) = descriptor.payload.as_ref().filter(|p| !p.is_empty()) {
        headers.push(("Content-Type".to_string(), payload.content_type.to_string()));
        headers.push(("Content-Length".to_string(), payload.bytes.len().to_string()));
    }

    if descriptor.expected != ExpectedShape::None {
        headers.push(("Accept".to_string(), mime::APPLICATION_JSON.to_string()));
    }

    if descriptor.requires_auth {
        let credentials = format!("{}:{}", configuration.username(), configuration.password());
        headers.push((
            "Authorization".to_string(),
            format!("Basic {}", BASE64.encode(credentials)),
        ));
    }

    for (name, value) in &descriptor.headers {
        match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.1 = value.clone(),
            None => headers.push((name.clone(), value.clone())),
        }
    }

    headers
}

/// Resolve `descriptor` against `configuration` without touching the network
pub fn prepare(
    descriptor: &RequestDescriptor,
    configuration: &dyn Configuration,
    user_agent: &str,
) -> Result<PreparedRequest, Error> {
    Ok(PreparedRequest {
        method: descriptor.method,
        url: build_url(descriptor, configuration)?.to_string(),
        headers: build_headers(descriptor, configuration, user_agent),
        body: descriptor
            .payload
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| p.bytes.clone()),
    })
}

/// Parse and validate a reply body against the expected shape. Returns
/// `None` when no body is expected.
pub fn check_shape(expected: ExpectedShape, body: &[u8]) -> Result<Option<Value>, Error> {
    if expected == ExpectedShape::None {
        return Ok(None);
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(empty_answer());
    }

    let json: Value = serde_json::from_slice(body).map_err(|e| Error::json_parsing(&e))?;

    let empty = match &json {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty {
        return Err(empty_answer());
    }

    match expected {
        ExpectedShape::Array if !json.is_array() => Err(Error::critical(
            ErrorKind::Output,
            "It was expected that the request returns a JSON array, but it returned something else.",
        )),
        ExpectedShape::Object if !json.is_object() => Err(Error::critical(
            ErrorKind::Output,
            "It was expected that the request returns a JSON object, but it returned something else.",
        )),
        _ => Ok(Some(json)),
    }
}

fn empty_answer() -> Error {
    Error::critical(
        ErrorKind::Output,
        "The request replied an empty answer, but there was content expected.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Account;
    use serde_json::json;

    fn account() -> Account {
        let account = Account::new();
        account.set_host("cloud.example.com");
        account.set_username("alice");
        account.set_password("secret");
        account
    }

    #[test]
    fn test_url_with_port_and_install_path() {
        let account = account();
        account.set_server_port(8443);
        account.set_install_path("/nextcloud/");

        let url = build_url(&RequestDescriptor::get("/feeds"), &account).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example.com:8443/nextcloud/index.php/apps/news/api/v1-2/feeds"
        );
    }

    #[test]
    fn test_url_for_root_base_without_ssl() {
        let account = account();
        account.set_use_ssl(false);

        let descriptor = RequestDescriptor::post("/index.php/login/v2").base(ApiBase::Root);
        let url = build_url(&descriptor, &account).unwrap();
        assert_eq!(url.as_str(), "http://cloud.example.com/index.php/login/v2");
    }

    #[test]
    fn test_url_query_is_encoded() {
        let descriptor = RequestDescriptor::get("/items")
            .query("batchSize", "20")
            .query("type", "3 & more");

        let url = build_url(&descriptor, &account()).unwrap();
        assert_eq!(url.query(), Some("batchSize=20&type=3+%26+more"));
    }

    #[test]
    fn test_headers_for_authenticated_json_post() {
        let descriptor = RequestDescriptor::post("/folders")
            .payload(Payload::json(&json!({"name": "Tech"})))
            .expect(ExpectedShape::Object);

        let prepared = prepare(&descriptor, &account(), "Reader/1.0").unwrap();

        assert_eq!(prepared.headers[0], ("User-Agent".to_string(), "Reader/1.0".to_string()));
        assert_eq!(prepared.header("content-type"), Some("application/json"));
        assert_eq!(prepared.header("Content-Length"), Some("15"));
        assert_eq!(prepared.header("Accept"), Some("application/json"));
        // base64("alice:secret")
        assert_eq!(prepared.header("Authorization"), Some("Basic YWxpY2U6c2VjcmV0"));
        assert_eq!(prepared.body.as_deref(), Some(br#"{"name":"Tech"}"#.as_slice()));
    }

    #[test]
    fn test_headers_without_auth_or_body() {
        let descriptor = RequestDescriptor::get("/status.php")
            .base(ApiBase::Root)
            .requires_auth(false);

        let prepared = prepare(&descriptor, &account(), "Reader/1.0").unwrap();
        assert_eq!(prepared.headers.len(), 1);
        assert!(prepared.header("Authorization").is_none());
        assert!(prepared.body.is_none());
    }

    #[test]
    fn test_custom_headers_override_case_insensitively() {
        let descriptor = RequestDescriptor::get("/feeds")
            .header("user-agent", "Custom")
            .header("X-Trace", "1");

        let headers = build_headers(&descriptor, &account(), "Reader/1.0");
        assert_eq!(headers[0], ("User-Agent".to_string(), "Custom".to_string()));
        assert!(headers.contains(&("X-Trace".to_string(), "1".to_string())));
    }

    #[test]
    fn test_missing_host_is_input_error() {
        let account = Account::new();
        let err = check_input(&RequestDescriptor::get("/feeds"), &account).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(err.severity(), crate::error::Severity::Critical);
    }

    #[test]
    fn test_missing_credentials_is_input_error() {
        let account = account();
        account.set_password("");

        let err = check_input(&RequestDescriptor::get("/feeds"), &account).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);

        let anonymous = RequestDescriptor::get("/status.php").requires_auth(false);
        assert!(check_input(&anonymous, &account).is_ok());
    }

    #[test]
    fn test_empty_route_is_input_error() {
        let err = check_input(&RequestDescriptor::get(""), &account()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(err.message(), "No API route specified.");
        assert!(check_input(&RequestDescriptor::get("  "), &account()).is_err());

        let root = RequestDescriptor::get("").base(ApiBase::Root);
        assert!(check_input(&root, &account()).is_ok());
    }

    #[test]
    fn test_wipe_check_follows_base() {
        assert!(RequestDescriptor::get("/feeds").check_for_wipe);
        assert!(!RequestDescriptor::get("/status.php").base(ApiBase::Root).check_for_wipe);
        assert!(
            RequestDescriptor::get("/status.php")
                .base(ApiBase::Root)
                .check_for_wipe(true)
                .check_for_wipe
        );
        assert!(!RequestDescriptor::get("/feeds").check_for_wipe(false).check_for_wipe);
    }

    #[test]
    fn test_post_without_payload_is_input_error() {
        let err = check_input(&RequestDescriptor::post("/folders"), &account()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);

        let empty = RequestDescriptor::post("/folders")
            .payload(Payload::new(Bytes::new(), mime::APPLICATION_JSON));
        assert!(check_input(&empty, &account()).is_err());

        let delete = RequestDescriptor::new(Method::Delete, "/folders/1");
        assert!(check_input(&delete, &account()).is_ok());
    }

    #[test]
    fn test_form_payload_is_encoded() {
        let payload = Payload::form(&[("token", "a b/c")]);
        assert_eq!(payload.bytes, Bytes::from_static(b"token=a+b%2Fc"));
        assert_eq!(payload.content_type, mime::APPLICATION_WWW_FORM_URLENCODED);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = check_shape(ExpectedShape::Array, br#"{"a":1}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);

        let err = check_shape(ExpectedShape::Object, b"[1]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Output);

        assert!(check_shape(ExpectedShape::Object, br#"{"a":1}"#).unwrap().is_some());
    }

    #[test]
    fn test_empty_and_invalid_bodies() {
        for body in [b"".as_slice(), b"  ", b"{}", b"[]", b"null"] {
            let err = check_shape(ExpectedShape::Object, body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Output);
            assert_eq!(
                err.message(),
                "The request replied an empty answer, but there was content expected."
            );
        }

        let err = check_shape(ExpectedShape::Array, b"[1,").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::JsonParsing);
    }

    #[test]
    fn test_no_expectation_ignores_body() {
        assert_eq!(check_shape(ExpectedShape::None, b"garbage").unwrap(), None);
    }
}
