//! HTTP task types built on the session client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use conveyor_config::TaskDefinition;
use conveyor_http::{CaptureToken, Method, RequestBody, RequestSpec, SessionResponse, parse_method};
use conveyor_state::ExecutionContext;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::TaskError;
use crate::params::Params;
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;
use crate::template::{expand_logged, expand_value};

/// Which HTTP helper a task type is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpKind {
  /// Full control: method, body, form, query. Output is status, headers
  /// and body.
  RestRequest,
  GetJson,
  GetText,
  /// Returned as text; no XML parsing is attempted.
  GetXml,
  /// Output is base64; the raw bytes go to file persistence.
  GetBinary,
  /// JSON body, `POST` unless `Method` says otherwise.
  SendJson,
}

pub struct Http {
  kind: HttpKind,
}

impl Http {
  pub fn new(kind: HttpKind) -> Self {
    Self { kind }
  }
}

#[async_trait]
impl TaskType for Http {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = self.run(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

impl Http {
  async fn run(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
    log: &mut Vec<String>,
  ) -> Result<TaskOutcome, TaskError> {
    let spec = self.build_spec(task, ctx, log)?;
    let response = engine.session().request(&spec, ctx, log).await?;
    Ok(self.outcome(response))
  }

  fn build_spec(
    &self,
    task: &TaskDefinition,
    ctx: &ExecutionContext,
    log: &mut Vec<String>,
  ) -> Result<RequestSpec, TaskError> {
    let params = Params::new(task);
    let url = expand_logged(&params.required_str("URL")?, ctx, log);

    let method = match (self.kind, params.str("Method")) {
      (HttpKind::RestRequest | HttpKind::SendJson, Some(method)) => parse_method(&method)?,
      (HttpKind::SendJson, None) => Method::POST,
      _ => Method::GET,
    };

    let mut spec = RequestSpec::new(method, url);

    match self.kind {
      HttpKind::GetJson | HttpKind::SendJson => spec.headers.push(("Accept".into(), "application/json".into())),
      HttpKind::GetXml => spec.headers.push(("Accept".into(), "application/xml, text/xml".into())),
      _ => {}
    }
    for (name, value) in params.string_pairs("Headers")? {
      let value = expand_logged(&value, ctx, log);
      spec.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
      spec.headers.push((name, value));
    }
    for (name, value) in params.string_pairs("Query")? {
      spec.query.push((name, expand_logged(&value, ctx, log)));
    }
    for (name, value) in params.string_pairs("Cookies")? {
      spec.cookies.insert(name, expand_logged(&value, ctx, log));
    }

    spec.body = self.body(&params, ctx, log)?;

    if let Some(retries) = params.u64("Retries")? {
      spec.retries = u32::try_from(retries).map_err(|_| TaskError::invalid("Retries", "too large"))?;
    }
    if let Some(ms) = params.u64("Timeout")? {
      spec.timeout = Some(Duration::from_millis(ms));
    }
    spec.store_cookies = params.bool("StoreCookies", true)?;
    if let Some(capture) = params.value("CaptureToken") {
      let capture: CaptureToken = serde_json::from_value(capture.clone())
        .map_err(|e| TaskError::invalid("CaptureToken", e.to_string()))?;
      spec.capture_token = Some(capture);
    }
    spec.capture_header = params.string_pairs("CaptureHeader")?.into_iter().collect();

    Ok(spec)
  }

  fn body(
    &self,
    params: &Params<'_>,
    ctx: &ExecutionContext,
    log: &mut Vec<String>,
  ) -> Result<Option<RequestBody>, TaskError> {
    if !matches!(self.kind, HttpKind::RestRequest | HttpKind::SendJson) {
      return Ok(None);
    }

    if self.kind == HttpKind::RestRequest && params.has("Form") {
      let pairs = params
        .string_pairs("Form")?
        .into_iter()
        .map(|(k, v)| (k, expand_logged(&v, ctx, log)))
        .collect();
      return Ok(Some(RequestBody::Form(pairs)));
    }

    let body = match params.value("Body") {
      Some(body) => Some(body.clone()),
      None => params
        .str("BodyAddress")
        .and_then(|address| ctx.resolve(&address).cloned()),
    };

    Ok(match body {
      None if self.kind == HttpKind::SendJson => Some(RequestBody::Json(json!({}))),
      None => None,
      Some(Value::String(text)) if self.kind == HttpKind::RestRequest => {
        Some(RequestBody::Text(expand_logged(&text, ctx, log)))
      }
      Some(value) => {
        let lookup = |name: &str| ctx.resolve(name).cloned();
        Some(RequestBody::Json(expand_value(&value, &lookup)))
      }
    })
  }

  fn outcome(&self, response: SessionResponse) -> TaskOutcome {
    let status = response.status;
    let result = match self.kind {
      HttpKind::RestRequest => TaskOutcome::complete(json!({
        "StatusCode": status,
        "Headers": response.headers_value(),
        "Body": response.body_value(),
      })),
      HttpKind::SendJson => TaskOutcome::complete(response.body_value()),
      HttpKind::GetJson => match &response.json {
        Some(json) => TaskOutcome::complete(json.clone()),
        None if response.is_success() => {
          return TaskOutcome::failure(
            Value::String(response.text()),
            "Response body is not valid JSON",
          );
        }
        None => TaskOutcome::complete(Value::String(response.text())),
      },
      HttpKind::GetText | HttpKind::GetXml => TaskOutcome::complete(Value::String(response.text())),
      HttpKind::GetBinary => {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&response.body);
        TaskOutcome::complete(Value::String(encoded)).with_binary(response.body.clone())
      }
    };

    if response.is_success() {
      result
    } else {
      TaskOutcome::failure(result.output, format!("HTTP request returned status {}", status))
    }
  }
}
