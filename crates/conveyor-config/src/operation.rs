use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// An ordered group of tasks run against one shared execution context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperationDefinition {
  #[serde(rename = "GUIDOperation", default)]
  pub guid_operation: String,
  #[serde(rename = "Name", default)]
  pub name: String,
  /// Task ids, executed strictly in this order.
  #[serde(rename = "Tasks", default)]
  pub tasks: Vec<String>,
  /// Seed for the run's global state.
  #[serde(rename = "GlobalState", default, skip_serializing_if = "Option::is_none")]
  pub global_state: Option<Map<String, Value>>,
  /// Overrides the configured staging root for this operation's runs.
  #[serde(rename = "StagingPath", default, skip_serializing_if = "Option::is_none")]
  pub staging_path: Option<String>,
}

impl OperationDefinition {
  pub fn new(guid_operation: impl Into<String>, tasks: Vec<String>) -> Self {
    let guid_operation = guid_operation.into();
    Self {
      name: guid_operation.clone(),
      guid_operation,
      tasks,
      ..Self::default()
    }
  }

  /// Parse an operation from a JSON document and validate it.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let operation: OperationDefinition =
      serde_json::from_str(json).map_err(|e| ConfigError::Parse {
        what: "operation definition".to_string(),
        source: e,
      })?;
    operation.validate()?;
    Ok(operation)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.guid_operation.trim().is_empty() {
      return Err(ConfigError::missing("GUIDOperation"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_operation() {
    let op = OperationDefinition::from_json(
      r#"{"GUIDOperation": "op1", "Name": "Nightly", "Tasks": ["a", "b"], "GlobalState": {"Region": "eu"}}"#,
    )
    .unwrap();
    assert_eq!(op.tasks, vec!["a", "b"]);
    assert_eq!(op.global_state.unwrap()["Region"], "eu");
  }

  #[test]
  fn test_missing_guid_operation() {
    let err = OperationDefinition::from_json(r#"{"Tasks": []}"#).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField { ref field } if field == "GUIDOperation"));
  }
}
