use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use conveyor_config::{OperationDefinition, TaskDefinition};

use crate::DefinitionStore;
use crate::error::StoreError;

/// Definitions held in process memory.
///
/// Mutation is synchronous so registrations can be removed from `Drop`
/// implementations.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
  tasks: RwLock<HashMap<String, TaskDefinition>>,
  operations: RwLock<HashMap<String, OperationDefinition>>,
}

impl InMemoryDefinitionStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or replace a task, keyed by its GUID.
  pub fn put_task(&self, task: TaskDefinition) {
    let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
    tasks.insert(task.guid_task.clone(), task);
  }

  /// Insert or replace an operation, keyed by its GUID.
  pub fn put_operation(&self, operation: OperationDefinition) {
    let mut operations = self.operations.write().unwrap_or_else(|e| e.into_inner());
    operations.insert(operation.guid_operation.clone(), operation);
  }

  pub fn remove_task(&self, guid: &str) -> Option<TaskDefinition> {
    let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
    tasks.remove(guid)
  }

  pub fn remove_operation(&self, guid: &str) -> Option<OperationDefinition> {
    let mut operations = self.operations.write().unwrap_or_else(|e| e.into_inner());
    operations.remove(guid)
  }

  pub fn contains_task(&self, guid: &str) -> bool {
    let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
    tasks.contains_key(guid)
  }

  pub fn contains_operation(&self, guid: &str) -> bool {
    let operations = self.operations.read().unwrap_or_else(|e| e.into_inner());
    operations.contains_key(guid)
  }

  pub fn lookup_task(&self, guid: &str) -> Option<TaskDefinition> {
    let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
    tasks.get(guid).cloned()
  }

  pub fn lookup_operation(&self, guid: &str) -> Option<OperationDefinition> {
    let operations = self.operations.read().unwrap_or_else(|e| e.into_inner());
    operations.get(guid).cloned()
  }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
  async fn get_task(&self, guid: &str) -> Result<TaskDefinition, StoreError> {
    self.lookup_task(guid).ok_or_else(|| StoreError::NotFound {
      kind: "task",
      guid: guid.to_string(),
    })
  }

  async fn get_operation(&self, guid: &str) -> Result<OperationDefinition, StoreError> {
    self.lookup_operation(guid).ok_or_else(|| StoreError::NotFound {
      kind: "operation",
      guid: guid.to_string(),
    })
  }
}
