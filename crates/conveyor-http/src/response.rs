use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde_json::Value;

/// The final attempt's response.
#[derive(Debug, Clone)]
pub struct SessionResponse {
  pub status: u16,
  /// Lowercased header names; repeated headers are joined with `", "`.
  pub headers: BTreeMap<String, String>,
  /// Raw `Set-Cookie` values, one per header line.
  pub set_cookies: Vec<String>,
  pub body: Bytes,
  /// The body parsed as JSON, when it is JSON.
  pub json: Option<Value>,
  pub attempts: u32,
}

impl SessionResponse {
  pub(crate) fn from_parts(status: u16, raw_headers: &HeaderMap, body: Bytes) -> Self {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in raw_headers {
      let Ok(value) = value.to_str() else {
        continue;
      };
      headers
        .entry(name.as_str().to_string())
        .and_modify(|existing| {
          existing.push_str(", ");
          existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
    }

    let set_cookies = raw_headers
      .get_all(SET_COOKIE)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .map(str::to_string)
      .collect();

    let json = serde_json::from_slice(&body).ok();

    Self {
      status,
      headers,
      set_cookies,
      body,
      json,
      attempts: 1,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  /// Body decoded as UTF-8, lossily.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// Parsed JSON when available, else the body as a string.
  pub fn body_value(&self) -> Value {
    self.json.clone().unwrap_or_else(|| Value::String(self.text()))
  }

  /// Headers as a JSON object.
  pub fn headers_value(&self) -> Value {
    Value::Object(
      self
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect(),
    )
  }
}

/// First `name=value` pair of a `Set-Cookie` header.
pub(crate) fn parse_set_cookie(header: &str) -> Option<(String, String)> {
  let pair = header.split(';').next()?;
  let (name, value) = pair.split_once('=')?;
  let name = name.trim();
  if name.is_empty() {
    return None;
  }
  Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderValue;

  #[test]
  fn test_parse_set_cookie() {
    assert_eq!(
      parse_set_cookie("session=abc123; Path=/; HttpOnly"),
      Some(("session".to_string(), "abc123".to_string()))
    );
    assert_eq!(
      parse_set_cookie("token=a=b"),
      Some(("token".to_string(), "a=b".to_string()))
    );
    assert_eq!(parse_set_cookie("=orphan"), None);
    assert_eq!(parse_set_cookie("garbage"), None);
  }

  #[test]
  fn test_from_parts() {
    let mut raw = HeaderMap::new();
    raw.append(SET_COOKIE, HeaderValue::from_static("a=1"));
    raw.append(SET_COOKIE, HeaderValue::from_static("b=2"));
    raw.insert("X-Trace", HeaderValue::from_static("t1"));

    let response = SessionResponse::from_parts(200, &raw, Bytes::from_static(b"{\"ok\":true}"));
    assert_eq!(response.set_cookies, vec!["a=1", "b=2"]);
    assert_eq!(response.header("x-TRACE"), Some("t1"));
    assert_eq!(response.json, Some(serde_json::json!({"ok": true})));

    let response = SessionResponse::from_parts(502, &raw, Bytes::from_static(b"<html>"));
    assert!(!response.is_success());
    assert!(response.json.is_none());
    assert_eq!(response.body_value(), serde_json::json!("<html>"));
  }
}
