//! Per-run execution context.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::address::{parse_address, resolve_in, set_in};

/// A JSON object used as a state mapping.
pub type StateMap = Map<String, Value>;

/// Key in global state holding the HTTP cookie jar.
pub const COOKIES_KEY: &str = "Cookies";

/// State threaded through every task of one run.
///
/// `global_state` is read-write and shared by every task in an operation;
/// `node_state` is a read-only fallback for lookups. Tasks of one run
/// execute one at a time, so the context is handed around as `&mut`
/// without locking. Launched children get their own context via
/// [`ExecutionContext::fork`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
  #[serde(rename = "GlobalState", default)]
  pub global_state: StateMap,
  #[serde(rename = "NodeState", default)]
  pub node_state: StateMap,
  #[serde(rename = "StagingPath", default, skip_serializing_if = "Option::is_none")]
  pub staging_path: Option<PathBuf>,
}

impl ExecutionContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_global_state(mut self, global_state: StateMap) -> Self {
    self.global_state = global_state;
    self
  }

  pub fn with_node_state(mut self, node_state: StateMap) -> Self {
    self.node_state = node_state;
    self
  }

  pub fn with_staging_path(mut self, staging_path: impl Into<PathBuf>) -> Self {
    self.staging_path = Some(staging_path.into());
    self
  }

  /// Resolve an address against global state, then node state.
  ///
  /// Never mutates either mapping.
  pub fn resolve(&self, address: &str) -> Option<&Value> {
    let segments = parse_address(address)?;
    resolve_in(&self.global_state, &segments).or_else(|| resolve_in(&self.node_state, &segments))
  }

  /// Write a value into global state, creating intermediate containers.
  ///
  /// Blank or malformed addresses are ignored.
  pub fn set(&mut self, address: &str, value: Value) {
    match parse_address(address) {
      Some(segments) => set_in(&mut self.global_state, &segments, value),
      None => tracing::debug!(address = %address, "ignoring write to unusable address"),
    }
  }

  /// Snapshot of the cookie jar as name/value pairs.
  pub fn cookies(&self) -> BTreeMap<String, String> {
    self
      .global_state
      .get(COOKIES_KEY)
      .and_then(Value::as_object)
      .map(|jar| {
        jar
          .iter()
          .map(|(name, value)| {
            let value = match value {
              Value::String(s) => s.clone(),
              other => other.to_string(),
            };
            (name.clone(), value)
          })
          .collect()
      })
      .unwrap_or_default()
  }

  /// Store a cookie in the jar, replacing any previous value.
  pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let jar = self
      .global_state
      .entry(COOKIES_KEY.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if !jar.is_object() {
      *jar = Value::Object(Map::new());
    }
    if let Value::Object(jar) = jar {
      jar.insert(name.into(), Value::String(value.into()));
    }
  }

  /// An independent deep copy for work that runs concurrently with this
  /// context's owner.
  pub fn fork(&self) -> Self {
    self.clone()
  }

  /// Deep-merge `overlay` into global state; overlay values win.
  pub fn merge_global(&mut self, overlay: &StateMap) {
    merge_state(&mut self.global_state, overlay);
  }
}

/// Deep-merge `overlay` into `target`. Nested objects merge key by key;
/// any other overlay value replaces the target's.
pub fn merge_state(target: &mut StateMap, overlay: &StateMap) {
  for (key, value) in overlay {
    if let (Some(Value::Object(existing)), Value::Object(incoming)) = (target.get_mut(key), value) {
      merge_state(existing, incoming);
      continue;
    }
    target.insert(key.clone(), value.clone());
  }
}
