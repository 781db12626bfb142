//! Task and operation manifests.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use conveyor_config::{OperationDefinition, TaskDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::ChainPhase;

/// Terminal (or in-flight) state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
  Running,
  Complete,
  Error,
  /// No behavior is registered for the task's `Type`.
  Unsupported,
}

/// State of an operation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
  Running,
  Complete,
  Error,
}

/// What a task type's core execution produced.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
  pub status: TaskStatus,
  pub success: bool,
  pub output: Value,
  pub log: Vec<String>,
  /// Raw bytes for binary results; file persistence writes these instead
  /// of `output`.
  pub binary: Option<Bytes>,
  /// Set by launch types: the real work continues in the background.
  pub is_async: bool,
}

impl TaskOutcome {
  pub fn complete(output: Value) -> Self {
    Self {
      status: TaskStatus::Complete,
      success: true,
      output,
      log: Vec::new(),
      binary: None,
      is_async: false,
    }
  }

  /// An `Error` outcome with no output.
  pub fn error(message: impl Into<String>) -> Self {
    Self::failure(Value::Null, message)
  }

  /// An `Error` outcome that still carries partial output.
  pub fn failure(output: Value, message: impl Into<String>) -> Self {
    Self {
      status: TaskStatus::Error,
      success: false,
      output,
      log: vec![message.into()],
      binary: None,
      is_async: false,
    }
  }

  pub fn unsupported(task_type: &str) -> Self {
    Self {
      status: TaskStatus::Unsupported,
      success: false,
      output: Value::Null,
      log: vec![format!("Unsupported task type '{}'", task_type)],
      binary: None,
      is_async: false,
    }
  }

  /// A background launch: reported complete before the work finishes.
  pub fn launched(output: Value) -> Self {
    Self {
      is_async: true,
      ..Self::complete(output)
    }
  }

  /// Prepend `log` to the outcome's own lines.
  pub fn with_log(mut self, mut log: Vec<String>) -> Self {
    log.append(&mut self.log);
    self.log = log;
    self
  }

  pub fn with_binary(mut self, bytes: Bytes) -> Self {
    self.binary = Some(bytes);
    self
  }
}

/// Result record of one task execution.
///
/// `Status` and `Success` only change together through
/// [`TaskManifestEntry::finish`]; `Log` is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifestEntry {
  #[serde(rename = "GUIDTask")]
  pub guid_task: String,
  #[serde(rename = "Name")]
  pub name: String,
  #[serde(rename = "Type")]
  pub task_type: String,
  #[serde(rename = "StartTime")]
  pub start_time: DateTime<Utc>,
  #[serde(rename = "StopTime", default, skip_serializing_if = "Option::is_none")]
  pub stop_time: Option<DateTime<Utc>>,
  #[serde(rename = "Status")]
  status: TaskStatus,
  #[serde(rename = "Success")]
  success: bool,
  #[serde(rename = "Output", default)]
  pub output: Value,
  #[serde(rename = "Async", default, skip_serializing_if = "std::ops::Not::not")]
  pub is_async: bool,
  #[serde(rename = "Log", default)]
  log: Vec<String>,
  #[serde(rename = "SubsequentResults", default, skip_serializing_if = "BTreeMap::is_empty")]
  subsequent_results: BTreeMap<ChainPhase, Vec<TaskManifestEntry>>,
}

impl TaskManifestEntry {
  /// A `Running` entry for `task`, stamped with the current time.
  pub fn start(task: &TaskDefinition) -> Self {
    Self {
      guid_task: task.guid_task.clone(),
      name: task.name.clone(),
      task_type: task.task_type.clone(),
      start_time: Utc::now(),
      stop_time: None,
      status: TaskStatus::Running,
      success: false,
      output: Value::Null,
      is_async: false,
      log: Vec::new(),
      subsequent_results: BTreeMap::new(),
    }
  }

  /// Synthetic `Error` result for a referenced task that could not be
  /// loaded.
  pub fn missing(guid: &str, message: impl Into<String>) -> Self {
    let now = Utc::now();
    let mut entry = Self {
      guid_task: guid.to_string(),
      name: guid.to_string(),
      task_type: String::new(),
      start_time: now,
      stop_time: None,
      status: TaskStatus::Running,
      success: false,
      output: Value::Null,
      is_async: false,
      log: Vec::new(),
      subsequent_results: BTreeMap::new(),
    };
    entry.push_log(message);
    entry.finish(TaskStatus::Error, false);
    entry
  }

  pub fn status(&self) -> TaskStatus {
    self.status
  }

  pub fn success(&self) -> bool {
    self.success
  }

  pub fn log(&self) -> &[String] {
    &self.log
  }

  pub fn subsequent_results(&self) -> &BTreeMap<ChainPhase, Vec<TaskManifestEntry>> {
    &self.subsequent_results
  }

  /// Child results for one chain phase, if that phase ran.
  pub fn phase(&self, phase: ChainPhase) -> Option<&[TaskManifestEntry]> {
    self.subsequent_results.get(&phase).map(Vec::as_slice)
  }

  pub fn push_log(&mut self, line: impl Into<String>) {
    let line = line.into();
    tracing::debug!(task_id = %self.guid_task, "{}", line);
    self.log.push(line);
  }

  /// Set the terminal status, success flag and stop time in one step.
  pub fn finish(&mut self, status: TaskStatus, success: bool) {
    self.status = status;
    self.success = success;
    self.stop_time = Some(Utc::now());
  }

  pub(crate) fn record_phase(&mut self, phase: ChainPhase, results: Vec<TaskManifestEntry>) {
    self.subsequent_results.insert(phase, results);
  }

  /// Wall-clock duration, zero while still running.
  pub fn elapsed_ms(&self) -> u64 {
    self
      .stop_time
      .map(|stop| (stop - self.start_time).num_milliseconds().max(0) as u64)
      .unwrap_or(0)
  }
}

/// Result record of one operation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationManifest {
  #[serde(rename = "GUIDOperation")]
  pub guid_operation: String,
  #[serde(rename = "GUIDRun")]
  pub guid_run: String,
  #[serde(rename = "Name")]
  pub name: String,
  #[serde(rename = "StartTime")]
  pub start_time: DateTime<Utc>,
  #[serde(rename = "StopTime", default, skip_serializing_if = "Option::is_none")]
  pub stop_time: Option<DateTime<Utc>>,
  #[serde(rename = "Status")]
  status: OperationStatus,
  #[serde(rename = "Success")]
  success: bool,
  #[serde(rename = "TaskResults", default)]
  task_results: Vec<TaskManifestEntry>,
  #[serde(rename = "Summary", default)]
  pub summary: String,
  #[serde(rename = "Log", default)]
  log: Vec<String>,
  #[serde(rename = "ElapsedMs", default)]
  pub elapsed_ms: u64,
  #[serde(rename = "AverageTaskMs", default)]
  pub average_task_ms: u64,
}

impl OperationManifest {
  pub fn start(operation: &OperationDefinition) -> Self {
    let start_time = Utc::now();
    Self {
      guid_operation: operation.guid_operation.clone(),
      guid_run: run_id(&operation.guid_operation, start_time),
      name: operation.name.clone(),
      start_time,
      stop_time: None,
      status: OperationStatus::Running,
      success: false,
      task_results: Vec::new(),
      summary: String::new(),
      log: Vec::new(),
      elapsed_ms: 0,
      average_task_ms: 0,
    }
  }

  pub fn status(&self) -> OperationStatus {
    self.status
  }

  pub fn success(&self) -> bool {
    self.success
  }

  pub fn task_results(&self) -> &[TaskManifestEntry] {
    &self.task_results
  }

  pub fn log(&self) -> &[String] {
    &self.log
  }

  pub fn push_log(&mut self, line: impl Into<String>) {
    let line = line.into();
    tracing::debug!(run_id = %self.guid_run, "{}", line);
    self.log.push(line);
  }

  pub(crate) fn push_result(&mut self, result: TaskManifestEntry) {
    self.task_results.push(result);
  }

  /// Close the run: success is the AND of every task's success, and
  /// status follows from it.
  pub(crate) fn finalize(&mut self, skipped: usize) {
    let stop = Utc::now();
    let success = self.task_results.iter().all(TaskManifestEntry::success);
    let succeeded = self.task_results.iter().filter(|r| r.success()).count();
    let total = self.task_results.len();

    self.elapsed_ms = (stop - self.start_time).num_milliseconds().max(0) as u64;
    self.average_task_ms = if total == 0 {
      0
    } else {
      self.task_results.iter().map(TaskManifestEntry::elapsed_ms).sum::<u64>() / total as u64
    };

    let label = if self.name.is_empty() {
      &self.guid_operation
    } else {
      &self.name
    };
    let mut summary = format!(
      "Operation '{}' {}: {} of {} task(s) succeeded in {}ms",
      label,
      if success { "completed" } else { "failed" },
      succeeded,
      total,
      self.elapsed_ms
    );
    if skipped > 0 {
      summary.push_str(&format!(", {} skipped", skipped));
    }
    self.summary = summary;

    self.status = if success {
      OperationStatus::Complete
    } else {
      OperationStatus::Error
    };
    self.success = success;
    self.stop_time = Some(stop);
  }

  /// Close a run that ended without finishing its task list.
  pub(crate) fn abort(&mut self, message: impl Into<String>) {
    let stop = Utc::now();
    let message = message.into();
    self.elapsed_ms = (stop - self.start_time).num_milliseconds().max(0) as u64;
    self.summary = message.clone();
    self.push_log(message);
    self.status = OperationStatus::Error;
    self.success = false;
    self.stop_time = Some(stop);
  }
}

/// Unique per invocation: `{GUIDOperation}-{epoch millis}-{8 hex chars}`.
pub(crate) fn run_id(guid: &str, at: DateTime<Utc>) -> String {
  let nonce = uuid::Uuid::new_v4().simple().to_string();
  format!("{}-{}-{}", guid, at.timestamp_millis(), &nonce[..8])
}
