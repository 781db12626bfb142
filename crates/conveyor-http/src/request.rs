use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// Where to find a token in a JSON response body and which cookie to
/// store it under.
///
/// The bare string form is a body path; the cookie is named after the
/// path's last segment (`"data.token"` stores cookie `token`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureToken {
  Path(String),
  Target {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Cookie")]
    cookie: String,
  },
}

impl CaptureToken {
  /// Dot path into the response body.
  pub fn path(&self) -> &str {
    match self {
      CaptureToken::Path(path) => path,
      CaptureToken::Target { address, .. } => address,
    }
  }

  /// Cookie name the captured value is stored under.
  pub fn cookie_name(&self) -> &str {
    match self {
      CaptureToken::Path(path) => path.rsplit('.').next().unwrap_or(path),
      CaptureToken::Target { cookie, .. } => cookie,
    }
  }
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
  Json(Value),
  Text(String),
  /// Sent as `application/x-www-form-urlencoded`.
  Form(Vec<(String, String)>),
}

impl RequestBody {
  pub(crate) fn encode(&self) -> (&'static str, Bytes) {
    match self {
      RequestBody::Json(value) => ("application/json", Bytes::from(value.to_string())),
      RequestBody::Text(text) => ("text/plain; charset=utf-8", Bytes::from(text.clone())),
      RequestBody::Form(pairs) => {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
          .extend_pairs(pairs)
          .finish();
        ("application/x-www-form-urlencoded", Bytes::from(encoded))
      }
    }
  }
}

/// Everything needed to issue one logical request (possibly several
/// attempts).
#[derive(Debug, Clone)]
pub struct RequestSpec {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  /// Appended to the URL's query string.
  pub query: Vec<(String, String)>,
  pub body: Option<RequestBody>,
  /// Task-level cookies; these win over the shared jar.
  pub cookies: BTreeMap<String, String>,
  /// Extra attempts after the first one fails.
  pub retries: u32,
  /// Per-attempt timeout; the client default applies when unset.
  pub timeout: Option<Duration>,
  /// Copy `Set-Cookie` values into the jar.
  pub store_cookies: bool,
  pub capture_token: Option<CaptureToken>,
  /// Response header name to state address.
  pub capture_header: BTreeMap<String, String>,
}

impl RequestSpec {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: Vec::new(),
      query: Vec::new(),
      body: None,
      cookies: BTreeMap::new(),
      retries: 0,
      timeout: None,
      store_cookies: true,
      capture_token: None,
      capture_header: BTreeMap::new(),
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.cookies.insert(name.into(), value.into());
    self
  }

  pub fn with_body(mut self, body: RequestBody) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_capture_token(mut self, capture: CaptureToken) -> Self {
    self.capture_token = Some(capture);
    self
  }

  pub fn with_capture_header(mut self, header: impl Into<String>, address: impl Into<String>) -> Self {
    self.capture_header.insert(header.into(), address.into());
    self
  }
}

/// Parse an HTTP method name, case-insensitively.
pub fn parse_method(method: &str) -> Result<Method, SessionError> {
  match method.trim().to_uppercase().as_str() {
    "GET" => Ok(Method::GET),
    "POST" => Ok(Method::POST),
    "PUT" => Ok(Method::PUT),
    "DELETE" => Ok(Method::DELETE),
    "PATCH" => Ok(Method::PATCH),
    "HEAD" => Ok(Method::HEAD),
    "OPTIONS" => Ok(Method::OPTIONS),
    _ => Err(SessionError::InvalidMethod {
      method: method.to_string(),
    }),
  }
}
