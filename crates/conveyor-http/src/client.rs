use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use conveyor_state::{ExecutionContext, parse_address, resolve_value};
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::error::SessionError;
use crate::request::RequestSpec;
use crate::response::{SessionResponse, parse_set_cookie};

/// HTTP client bound to an execution context's cookie jar.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct SessionClient {
  client: Client,
  timeout: Duration,
  retry_delay: Duration,
}

/// Why a single attempt produced no response.
enum AttemptFailure {
  Timeout,
  Transport(reqwest::Error),
}

impl std::fmt::Display for AttemptFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      AttemptFailure::Timeout => write!(f, "timed out"),
      AttemptFailure::Transport(e) => write!(f, "{}", e),
    }
  }
}

impl SessionClient {
  /// `timeout` applies per attempt unless a request sets its own;
  /// `retry_delay` is the fixed pause between attempts.
  pub fn new(timeout: Duration, retry_delay: Duration) -> Self {
    Self {
      client: Client::new(),
      timeout,
      retry_delay,
    }
  }

  /// Issue `spec`, retrying on transport errors, timeouts and status codes
  /// of 300 and above.
  ///
  /// Only the final attempt is reported. Cookie, token and header capture
  /// are applied to `ctx` from that final response. Human-readable lines
  /// describing the exchange are appended to `log`.
  #[instrument(
    name = "session_request",
    skip(self, spec, ctx, log),
    fields(method = %spec.method, url = %spec.url, retries = spec.retries)
  )]
  pub async fn request(
    &self,
    spec: &RequestSpec,
    ctx: &mut ExecutionContext,
    log: &mut Vec<String>,
  ) -> Result<SessionResponse, SessionError> {
    let url = build_url(spec)?;
    let headers = build_headers(spec, &ctx.cookies())?;
    let body = spec.body.as_ref().map(|b| b.encode().1);
    let timeout = spec.timeout.unwrap_or(self.timeout);
    let total = spec.retries.saturating_add(1);

    let mut attempt: u32 = 0;
    let outcome = loop {
      attempt += 1;
      let outcome = self
        .attempt(spec.method.clone(), url.clone(), &headers, body.clone(), timeout)
        .await;

      let failure = match &outcome {
        Ok(response) if response.is_success() => None,
        Ok(response) => Some(format!("status {}", response.status)),
        Err(e) => Some(e.to_string()),
      };
      let Some(reason) = failure else {
        break outcome;
      };
      if attempt >= total {
        break outcome;
      }

      log.push(format!(
        "Attempt {}/{} failed ({}); retrying in {}ms",
        attempt,
        total,
        reason,
        self.retry_delay.as_millis()
      ));
      tracing::warn!(attempt, total, reason = %reason, "request_retry");
      tokio::time::sleep(self.retry_delay).await;
    };

    let mut response = match outcome {
      Ok(response) => response,
      Err(AttemptFailure::Timeout) => {
        let timeout_ms = timeout.as_millis() as u64;
        log.push(format!(
          "{} {} timed out after {}ms ({} attempt(s))",
          spec.method, url, timeout_ms, attempt
        ));
        return Err(SessionError::Timeout {
          timeout_ms,
          attempts: attempt,
        });
      }
      Err(AttemptFailure::Transport(source)) => {
        log.push(format!(
          "{} {} failed: {} ({} attempt(s))",
          spec.method, url, source, attempt
        ));
        return Err(SessionError::Transport {
          attempts: attempt,
          source,
        });
      }
    };
    response.attempts = attempt;

    log.push(format!(
      "{} {} -> {} ({} attempt(s))",
      spec.method, url, response.status, attempt
    ));
    tracing::info!(status = response.status, attempts = attempt, "request_completed");

    if spec.store_cookies {
      store_cookies(&response, ctx, log);
    }
    capture_token(spec, &response, ctx, log);
    capture_headers(spec, &response, ctx, log);

    Ok(response)
  }

  async fn attempt(
    &self,
    method: Method,
    url: Url,
    headers: &HeaderMap,
    body: Option<Bytes>,
    timeout: Duration,
  ) -> Result<SessionResponse, AttemptFailure> {
    let mut request = self.client.request(method, url).headers(headers.clone());
    if let Some(body) = body {
      request = request.body(body);
    }

    let exchange = async {
      let response = request.send().await?;
      let status = response.status().as_u16();
      let headers = response.headers().clone();
      let body = response.bytes().await?;
      Ok::<_, reqwest::Error>(SessionResponse::from_parts(status, &headers, body))
    };

    // Dropping the exchange future on timeout aborts the in-flight call.
    match tokio::time::timeout(timeout, exchange).await {
      Err(_) => Err(AttemptFailure::Timeout),
      Ok(Err(e)) if e.is_timeout() => Err(AttemptFailure::Timeout),
      Ok(Err(e)) => Err(AttemptFailure::Transport(e)),
      Ok(Ok(response)) => Ok(response),
    }
  }
}

fn build_url(spec: &RequestSpec) -> Result<Url, SessionError> {
  let mut url = Url::parse(spec.url.trim()).map_err(|e| SessionError::InvalidUrl {
    url: spec.url.clone(),
    message: e.to_string(),
  })?;
  if !spec.query.is_empty() {
    url.query_pairs_mut().extend_pairs(&spec.query);
  }
  Ok(url)
}

fn build_headers(spec: &RequestSpec, jar: &BTreeMap<String, String>) -> Result<HeaderMap, SessionError> {
  let mut headers = HeaderMap::new();
  for (name, value) in &spec.headers {
    let header_name =
      HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| SessionError::InvalidHeader {
        name: name.clone(),
        message: e.to_string(),
      })?;
    let header_value = HeaderValue::from_str(value).map_err(|e| SessionError::InvalidHeader {
      name: name.clone(),
      message: e.to_string(),
    })?;
    headers.append(header_name, header_value);
  }

  if let Some(body) = &spec.body {
    if !headers.contains_key(CONTENT_TYPE) {
      headers.insert(CONTENT_TYPE, HeaderValue::from_static(body.encode().0));
    }
  }

  // Jar first so task-level cookies overwrite same-named entries.
  let mut cookies = jar.clone();
  cookies.extend(spec.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
  if !cookies.is_empty() {
    let joined = cookies
      .iter()
      .map(|(name, value)| format!("{}={}", name, value))
      .collect::<Vec<_>>()
      .join("; ");
    let value = HeaderValue::from_str(&joined).map_err(|e| SessionError::InvalidHeader {
      name: "Cookie".to_string(),
      message: e.to_string(),
    })?;
    headers.insert(COOKIE, value);
  }

  Ok(headers)
}

fn store_cookies(response: &SessionResponse, ctx: &mut ExecutionContext, log: &mut Vec<String>) {
  for header in &response.set_cookies {
    if let Some((name, value)) = parse_set_cookie(header) {
      log.push(format!("Stored cookie '{}'", name));
      ctx.set_cookie(name, value);
    }
  }
}

fn capture_token(
  spec: &RequestSpec,
  response: &SessionResponse,
  ctx: &mut ExecutionContext,
  log: &mut Vec<String>,
) {
  let Some(capture) = &spec.capture_token else {
    return;
  };

  let token = response.json.as_ref().and_then(|body| {
    let segments = parse_address(capture.path())?;
    resolve_value(body, &segments)
  });

  match token {
    Some(Value::Null) | None => {
      log.push(format!(
        "CaptureToken: '{}' not found in response body",
        capture.path()
      ));
      tracing::warn!(path = %capture.path(), "capture_token_missing");
    }
    Some(value) => {
      let token = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      log.push(format!(
        "CaptureToken: stored '{}' as cookie '{}'",
        capture.path(),
        capture.cookie_name()
      ));
      ctx.set_cookie(capture.cookie_name(), token);
    }
  }
}

fn capture_headers(
  spec: &RequestSpec,
  response: &SessionResponse,
  ctx: &mut ExecutionContext,
  log: &mut Vec<String>,
) {
  for (header, address) in &spec.capture_header {
    match response.header(header) {
      Some(value) => {
        ctx.set(address, Value::String(value.to_string()));
        log.push(format!("CaptureHeader: '{}' -> {}", header, address));
      }
      None => log.push(format!("CaptureHeader: '{}' not present in response", header)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_cookies_win_over_jar() {
    let jar = BTreeMap::from([
      ("session".to_string(), "from-jar".to_string()),
      ("theme".to_string(), "dark".to_string()),
    ]);
    let spec = RequestSpec::get("http://localhost/").with_cookie("session", "from-task");

    let headers = build_headers(&spec, &jar).unwrap();
    assert_eq!(
      headers.get(COOKIE).unwrap().to_str().unwrap(),
      "session=from-task; theme=dark"
    );
  }

  #[test]
  fn test_query_is_appended() {
    let mut spec = RequestSpec::get("http://localhost/items?a=1");
    spec.query.push(("page".to_string(), "2".to_string()));
    assert_eq!(build_url(&spec).unwrap().as_str(), "http://localhost/items?a=1&page=2");
  }

  #[test]
  fn test_invalid_url() {
    let spec = RequestSpec::get("not a url");
    assert!(matches!(build_url(&spec), Err(SessionError::InvalidUrl { .. })));
  }
}
