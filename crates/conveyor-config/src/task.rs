use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Address the primary result is written to when `Destination` is unset.
pub const DEFAULT_DESTINATION: &str = "Output";

/// Durable sink for a task's result.
///
/// Accepts either a bare state address (`"Reports.Latest"`) or an object
/// naming a state address, a staging file, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersistTarget {
  Address(String),
  Sink {
    #[serde(rename = "Address", default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(rename = "File", default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
  },
}

impl PersistTarget {
  /// State address to persist into, if any.
  pub fn address(&self) -> Option<&str> {
    match self {
      PersistTarget::Address(address) => Some(address.as_str()),
      PersistTarget::Sink { address, .. } => address.as_deref(),
    }
    .filter(|a| !a.is_empty())
  }

  /// Staging-relative file to persist into, if any.
  pub fn file(&self) -> Option<&str> {
    match self {
      PersistTarget::Address(_) => None,
      PersistTarget::Sink { file, .. } => file.as_deref(),
    }
    .filter(|f| !f.is_empty())
  }
}

/// A single unit of work.
///
/// Immutable for the duration of a run. `task_type` selects the behavior;
/// everything the behavior needs beyond the common fields lives in
/// `params`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
  #[serde(rename = "GUIDTask", default)]
  pub guid_task: String,
  #[serde(rename = "Name", default)]
  pub name: String,
  #[serde(rename = "Type", default)]
  pub task_type: String,
  #[serde(rename = "Destination", default, skip_serializing_if = "Option::is_none")]
  pub destination: Option<String>,
  #[serde(rename = "Persist", default, skip_serializing_if = "Option::is_none")]
  pub persist: Option<PersistTarget>,
  #[serde(rename = "onBefore", default, skip_serializing_if = "Vec::is_empty")]
  pub on_before: Vec<String>,
  #[serde(rename = "onCompletion", default, skip_serializing_if = "Vec::is_empty")]
  pub on_completion: Vec<String>,
  #[serde(rename = "onSubsequent", default, skip_serializing_if = "Vec::is_empty")]
  pub on_subsequent: Vec<String>,
  #[serde(rename = "onFailure", default, skip_serializing_if = "Vec::is_empty")]
  pub on_failure: Vec<String>,
  #[serde(rename = "onError", default, skip_serializing_if = "Vec::is_empty")]
  pub on_error: Vec<String>,
  /// Type-specific parameters (`Command`, `URL`, `File`, `Address`, ...).
  #[serde(flatten)]
  pub params: Map<String, Value>,
}

impl TaskDefinition {
  /// Create a definition with the given id and type and no parameters.
  pub fn new(guid_task: impl Into<String>, task_type: impl Into<String>) -> Self {
    let guid_task = guid_task.into();
    Self {
      name: guid_task.clone(),
      guid_task,
      task_type: task_type.into(),
      ..Self::default()
    }
  }

  /// Builder-style parameter setter.
  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }

  /// Parse a definition from a JSON document and validate it.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let task: TaskDefinition = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
      what: "task definition".to_string(),
      source: e,
    })?;
    task.validate()?;
    Ok(task)
  }

  /// Check the structural requirements for execution.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.guid_task.trim().is_empty() {
      return Err(ConfigError::missing("GUIDTask"));
    }
    Ok(())
  }

  /// Look up a parameter by name, falling back to a case-insensitive match.
  pub fn param(&self, key: &str) -> Option<&Value> {
    self.params.get(key).or_else(|| {
      self
        .params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
    })
  }

  /// Address the primary result is written to.
  pub fn destination(&self) -> &str {
    self
      .destination
      .as_deref()
      .filter(|d| !d.is_empty())
      .unwrap_or(DEFAULT_DESTINATION)
  }

  /// Display label used in logs: the name, or the id when unnamed.
  pub fn label(&self) -> &str {
    if self.name.is_empty() {
      &self.guid_task
    } else {
      &self.name
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_with_chains_and_params() {
    let task = TaskDefinition::from_json(
      r#"{
        "GUIDTask": "t1",
        "Name": "Fetch",
        "Type": "GetJSON",
        "URL": "http://localhost/items",
        "Destination": "Items",
        "onCompletion": ["t2"],
        "onError": ["t3", "t4"]
      }"#,
    )
    .unwrap();

    assert_eq!(task.guid_task, "t1");
    assert_eq!(task.task_type, "GetJSON");
    assert_eq!(task.destination(), "Items");
    assert_eq!(task.on_completion, vec!["t2"]);
    assert_eq!(task.on_error, vec!["t3", "t4"]);
    assert!(task.on_before.is_empty());
    assert_eq!(task.param("URL"), Some(&json!("http://localhost/items")));
    assert_eq!(task.param("url"), Some(&json!("http://localhost/items")));
  }

  #[test]
  fn test_missing_guid_is_validation_error() {
    let err = TaskDefinition::from_json(r#"{"Type": "Command"}"#).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { ref field } if field == "GUIDTask"));

    let err = TaskDefinition::from_json(r#"{"GUIDTask": "  ", "Type": "Command"}"#).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { .. }));
  }

  #[test]
  fn test_default_destination() {
    let task = TaskDefinition::new("t1", "Command");
    assert_eq!(task.destination(), DEFAULT_DESTINATION);
  }

  #[test]
  fn test_persist_forms() {
    let task: TaskDefinition =
      serde_json::from_value(json!({"GUIDTask": "a", "Persist": "Saved.Value"})).unwrap();
    let persist = task.persist.unwrap();
    assert_eq!(persist.address(), Some("Saved.Value"));
    assert_eq!(persist.file(), None);

    let task: TaskDefinition =
      serde_json::from_value(json!({"GUIDTask": "a", "Persist": {"File": "out.json"}})).unwrap();
    let persist = task.persist.unwrap();
    assert_eq!(persist.address(), None);
    assert_eq!(persist.file(), Some("out.json"));
  }

  #[test]
  fn test_round_trip_keeps_flattened_params() {
    let task = TaskDefinition::new("t1", "Command").with_param("Command", "echo hi");
    let value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["Command"], "echo hi");
    assert_eq!(value["GUIDTask"], "t1");
    assert!(value.get("onBefore").is_none());
  }
}
