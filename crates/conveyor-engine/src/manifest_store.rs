//! In-memory registry of run manifests.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::result::{OperationManifest, OperationStatus, TaskManifestEntry, TaskStatus};

/// Completed and in-flight manifests keyed by run id.
///
/// Entries live until the process exits. Snapshots are copied in and out,
/// so a reader never holds a reference into a manifest that is still
/// being written.
#[derive(Debug, Default)]
pub struct ManifestStore {
  operations: RwLock<HashMap<String, OperationManifest>>,
  tasks: RwLock<HashMap<String, TaskManifestEntry>>,
}

impl ManifestStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or replace the snapshot for `manifest.guid_run`.
  pub fn record_operation(&self, manifest: &OperationManifest) {
    let mut operations = self.operations.write().unwrap_or_else(|e| e.into_inner());
    operations.insert(manifest.guid_run.clone(), manifest.clone());
  }

  /// Insert or replace the snapshot for a launched task run.
  pub fn record_task(&self, guid_run: &str, entry: &TaskManifestEntry) {
    let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
    tasks.insert(guid_run.to_string(), entry.clone());
  }

  pub fn operation(&self, guid_run: &str) -> Option<OperationManifest> {
    let operations = self.operations.read().unwrap_or_else(|e| e.into_inner());
    operations.get(guid_run).cloned()
  }

  pub fn task(&self, guid_run: &str) -> Option<TaskManifestEntry> {
    let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
    tasks.get(guid_run).cloned()
  }

  /// Every operation run, newest first.
  pub fn operations(&self) -> Vec<OperationManifest> {
    let operations = self.operations.read().unwrap_or_else(|e| e.into_inner());
    let mut all: Vec<OperationManifest> = operations.values().cloned().collect();
    all.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    all
  }

  /// Runs of one operation definition, newest first.
  pub fn runs_of(&self, guid_operation: &str) -> Vec<OperationManifest> {
    self
      .operations()
      .into_iter()
      .filter(|m| m.guid_operation == guid_operation)
      .collect()
  }

  /// Operation runs that have not finished.
  pub fn running(&self) -> Vec<OperationManifest> {
    self
      .operations()
      .into_iter()
      .filter(|m| m.status() == OperationStatus::Running)
      .collect()
  }

  /// Launched task runs that have not finished, by run id.
  pub fn running_tasks(&self) -> Vec<(String, TaskManifestEntry)> {
    let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
    tasks
      .iter()
      .filter(|(_, entry)| entry.status() == TaskStatus::Running)
      .map(|(id, entry)| (id.clone(), entry.clone()))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use conveyor_config::{OperationDefinition, TaskDefinition};

  #[test]
  fn test_snapshots_replace_by_run_id() {
    let store = ManifestStore::new();
    let mut manifest = OperationManifest::start(&OperationDefinition::new("op", vec![]));
    store.record_operation(&manifest);
    assert_eq!(store.running().len(), 1);

    manifest.finalize(0);
    store.record_operation(&manifest);

    let stored = store.operation(&manifest.guid_run).unwrap();
    assert_eq!(stored.status(), OperationStatus::Complete);
    assert!(store.running().is_empty());
    assert_eq!(store.runs_of("op").len(), 1);
  }

  #[test]
  fn test_operations_newest_first() {
    let store = ManifestStore::new();
    let first = OperationManifest::start(&OperationDefinition::new("a", vec![]));
    std::thread::sleep(std::time::Duration::from_millis(5));
    let second = OperationManifest::start(&OperationDefinition::new("b", vec![]));
    store.record_operation(&first);
    store.record_operation(&second);

    let all = store.operations();
    assert_eq!(all[0].guid_operation, "b");
    assert_eq!(all[1].guid_operation, "a");
  }

  #[test]
  fn test_task_runs() {
    let store = ManifestStore::new();
    let mut entry = TaskManifestEntry::start(&TaskDefinition::new("t", "Command"));
    store.record_task("run-1", &entry);
    assert_eq!(store.running_tasks().len(), 1);

    entry.finish(TaskStatus::Complete, true);
    store.record_task("run-1", &entry);
    assert!(store.task("run-1").unwrap().success());
    assert!(store.running_tasks().is_empty());
  }
}
