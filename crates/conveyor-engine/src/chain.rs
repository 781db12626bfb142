//! Subsequent-task chaining.
//!
//! Around a task's core execution the engine runs up to five auxiliary
//! task lists. The order is fixed:
//!
//! ```text
//! onBefore → core → [onCompletion] [onFailure] [onError] → onSubsequent
//! ```
//!
//! Chained tasks run through the standalone path, so they never trigger
//! chains of their own. That one-level limit is what keeps cyclic
//! references between definitions from recursing.

use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::Engine;
use crate::result::{TaskManifestEntry, TaskStatus};

/// One of the five chain lists on a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChainPhase {
  #[serde(rename = "onBefore")]
  Before,
  #[serde(rename = "onCompletion")]
  Completion,
  #[serde(rename = "onFailure")]
  Failure,
  #[serde(rename = "onError")]
  Error,
  #[serde(rename = "onSubsequent")]
  Subsequent,
}

impl ChainPhase {
  pub fn name(self) -> &'static str {
    match self {
      ChainPhase::Before => "onBefore",
      ChainPhase::Completion => "onCompletion",
      ChainPhase::Failure => "onFailure",
      ChainPhase::Error => "onError",
      ChainPhase::Subsequent => "onSubsequent",
    }
  }

  /// The task ids this phase runs for `task`.
  pub fn task_ids(self, task: &TaskDefinition) -> &[String] {
    match self {
      ChainPhase::Before => &task.on_before,
      ChainPhase::Completion => &task.on_completion,
      ChainPhase::Failure => &task.on_failure,
      ChainPhase::Error => &task.on_error,
      ChainPhase::Subsequent => &task.on_subsequent,
    }
  }

  /// Phases to consider after the core finished, in run order.
  ///
  /// `Failure` and `Error` are independent triggers; an errored,
  /// unsuccessful task gets both.
  pub fn after_core(status: TaskStatus, success: bool) -> Vec<ChainPhase> {
    let mut phases = Vec::with_capacity(4);
    if status == TaskStatus::Complete && success {
      phases.push(ChainPhase::Completion);
    }
    if !success {
      phases.push(ChainPhase::Failure);
    }
    if status == TaskStatus::Error {
      phases.push(ChainPhase::Error);
    }
    phases.push(ChainPhase::Subsequent);
    phases
  }
}

impl std::fmt::Display for ChainPhase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

impl Engine {
  /// Run `task` with its chain phases around the core execution.
  pub(crate) async fn run_chained(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
  ) -> TaskManifestEntry {
    let before = self.run_phase(ChainPhase::Before, task, ctx).await;

    let mut entry = self.run_standalone(task, ctx).await;

    if let Some(results) = before {
      for child in results.iter().filter(|r| !r.success()) {
        warn!(task_id = %task.guid_task, child_id = %child.guid_task, "before_task_failed");
        entry.push_log(format!(
          "onBefore task '{}' did not succeed ({:?}); core execution was not blocked",
          child.guid_task,
          child.status()
        ));
      }
      entry.record_phase(ChainPhase::Before, results);
    }

    for phase in ChainPhase::after_core(entry.status(), entry.success()) {
      if let Some(results) = self.run_phase(phase, task, ctx).await {
        entry.push_log(format!("{}: ran {} task(s)", phase, results.len()));
        entry.record_phase(phase, results);
      }
    }

    entry
  }

  /// Run one phase's list sequentially. `None` when the list is empty so
  /// the caller records nothing for it.
  async fn run_phase(
    &self,
    phase: ChainPhase,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
  ) -> Option<Vec<TaskManifestEntry>> {
    let ids = phase.task_ids(task);
    if ids.is_empty() {
      return None;
    }

    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
      match self.lookup_task(id).await {
        Ok(child) => results.push(self.run_standalone(&child, ctx).await),
        Err(e) => {
          warn!(task_id = %task.guid_task, phase = %phase, child_id = %id, error = %e, "chain_task_missing");
          results.push(TaskManifestEntry::missing(
            id,
            format!("{} task '{}' could not be loaded: {}", phase, id, e),
          ));
        }
      }
    }
    Some(results)
  }
}
