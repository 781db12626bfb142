//! Task type dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::result::TaskOutcome;

/// One behavior selectable through a task's `Type`.
///
/// Implementations report every execution-time failure through the
/// returned outcome; they never panic or return early with an error.
#[async_trait]
pub trait TaskType: Send + Sync {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome;
}

/// Case-insensitive map from type name to behavior.
#[derive(Clone, Default)]
pub struct TaskTypeRegistry {
  types: HashMap<String, Arc<dyn TaskType>>,
}

impl TaskTypeRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding every builtin task type.
  pub fn builtin() -> Self {
    let mut registry = Self::new();
    crate::types::register_builtin(&mut registry);
    registry
  }

  /// Register `task_type` under `name`, replacing any previous entry.
  pub fn register(&mut self, name: &str, task_type: impl TaskType + 'static) {
    self.types.insert(name.to_ascii_lowercase(), Arc::new(task_type));
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn TaskType>> {
    self.types.get(&name.trim().to_ascii_lowercase()).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.types.contains_key(&name.trim().to_ascii_lowercase())
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.types.keys().cloned().collect();
    names.sort();
    names
  }
}

/// Turn a fallible core run into an outcome, keeping the lines logged
/// before any failure.
pub(crate) fn settle(result: Result<TaskOutcome, TaskError>, log: Vec<String>) -> TaskOutcome {
  match result {
    Ok(outcome) => outcome.with_log(log),
    Err(e) => TaskOutcome::error(e.to_string()).with_log(log),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  struct Echo;

  #[async_trait]
  impl TaskType for Echo {
    async fn execute(
      &self,
      task: &TaskDefinition,
      _ctx: &mut ExecutionContext,
      _engine: &Engine,
    ) -> TaskOutcome {
      TaskOutcome::complete(json!(task.guid_task))
    }
  }

  #[test]
  fn test_lookup_is_case_insensitive() {
    let mut registry = TaskTypeRegistry::new();
    registry.register("EchoTask", Echo);
    assert!(registry.get("echotask").is_some());
    assert!(registry.contains(" ECHOTASK "));
    assert!(registry.get("Other").is_none());
  }

  #[test]
  fn test_builtin_names() {
    let registry = TaskTypeRegistry::builtin();
    for name in [
      "Command",
      "CommandEach",
      "RestRequest",
      "GetJSON",
      "GetText",
      "GetXML",
      "GetBinary",
      "SendJSON",
      "ReadJSON",
      "ReadText",
      "ReadXML",
      "ReadBinary",
      "WriteJSON",
      "WriteText",
      "WriteXML",
      "WriteBinary",
      "ListFiles",
      "CopyFile",
      "Conditional",
      "CollectValues",
      "DateWindow",
      "TemplateString",
      "Solver",
      "GeneratePagedOperation",
      "LaunchTask",
      "LaunchOperation",
    ] {
      assert!(registry.contains(name), "missing builtin {}", name);
    }
  }

  #[test]
  fn test_settle_keeps_earlier_lines() {
    let outcome = settle(
      Err(TaskError::missing("Command")),
      vec!["first".to_string()],
    );
    assert!(!outcome.success);
    assert_eq!(outcome.log[0], "first");
    assert!(outcome.log[1].contains("Command"));
  }
}
