//! Typed access to a task's free-form parameters.

use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::{Map, Value};

use crate::error::TaskError;

/// Read-only view over [`TaskDefinition::params`].
///
/// Keys match exactly first, then case-insensitively. JSON `null` counts
/// as absent.
#[derive(Clone, Copy)]
pub(crate) struct Params<'a> {
  task: &'a TaskDefinition,
}

impl<'a> Params<'a> {
  pub fn new(task: &'a TaskDefinition) -> Self {
    Self { task }
  }

  pub fn value(&self, key: &str) -> Option<&'a Value> {
    self.task.param(key).filter(|v| !v.is_null())
  }

  pub fn has(&self, key: &str) -> bool {
    self.value(key).is_some()
  }

  /// A scalar parameter as text. Empty strings count as absent.
  pub fn str(&self, key: &str) -> Option<String> {
    match self.value(key)? {
      Value::String(s) if s.is_empty() => None,
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      _ => None,
    }
  }

  pub fn required_str(&self, key: &str) -> Result<String, TaskError> {
    self.str(key).ok_or_else(|| TaskError::missing(key))
  }

  /// Booleans, `"true"`/`"false"` (any case) and numbers are accepted.
  pub fn bool(&self, key: &str, default: bool) -> Result<bool, TaskError> {
    match self.value(key) {
      None => Ok(default),
      Some(Value::Bool(b)) => Ok(*b),
      Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
      Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" | "" => Ok(false),
        _ => Err(TaskError::invalid(key, format!("expected a boolean, got '{}'", s))),
      },
      Some(other) => Err(TaskError::invalid(key, format!("expected a boolean, got {}", other))),
    }
  }

  /// A non-negative integer given as a number or numeric string.
  pub fn u64(&self, key: &str) -> Result<Option<u64>, TaskError> {
    match self.value(key) {
      None => Ok(None),
      Some(value) => as_u64(value)
        .map(Some)
        .ok_or_else(|| TaskError::invalid(key, format!("expected a non-negative integer, got {}", value))),
    }
  }

  pub fn object(&self, key: &str) -> Result<Option<&'a Map<String, Value>>, TaskError> {
    match self.value(key) {
      None => Ok(None),
      Some(Value::Object(map)) => Ok(Some(map)),
      Some(other) => Err(TaskError::invalid(key, format!("expected an object, got {}", other))),
    }
  }

  /// An object of scalars as ordered string pairs.
  pub fn string_pairs(&self, key: &str) -> Result<Vec<(String, String)>, TaskError> {
    let Some(map) = self.object(key)? else {
      return Ok(Vec::new());
    };
    Ok(
      map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), scalar_text(v)))
        .collect(),
    )
  }

  /// The literal `value_key` parameter if present, else the value found at
  /// the state address named by `address_key`.
  pub fn value_or_address(
    &self,
    ctx: &ExecutionContext,
    value_key: &str,
    address_key: &str,
  ) -> Option<Value> {
    if let Some(value) = self.task.param(value_key) {
      return Some(value.clone());
    }
    let address = self.str(address_key)?;
    ctx.resolve(&address).cloned()
  }
}

/// Text form of a JSON value: strings unquoted, everything else as JSON.
pub(crate) fn scalar_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

pub(crate) fn as_u64(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n
      .as_u64()
      .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Truthiness used by branching: `false`, `0`, empty strings, `"false"`,
/// `"0"`, `"no"`, empty arrays/objects and `null` are false.
pub(crate) fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => {
      let s = s.trim().to_ascii_lowercase();
      !(s.is_empty() || s == "false" || s == "0" || s == "no" || s == "null")
    }
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}
