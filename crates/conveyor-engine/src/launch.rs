//! Fire-and-forget background execution.
//!
//! A launch spawns the work onto the tokio runtime and returns before it
//! starts. The caller gets a [`LaunchTicket`] naming the run; the outcome
//! is only observable through the [`ManifestStore`](crate::ManifestStore)
//! and the logs. There is no join or cancellation. A run whose work
//! panics is recorded as `Error` by a watcher on its join handle.

use chrono::Utc;
use conveyor_config::{OperationDefinition, TaskDefinition};
use conveyor_state::ExecutionContext;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::Engine;
use crate::result::{OperationManifest, TaskManifestEntry, TaskStatus, run_id};

/// Identifies a launched run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchTicket {
  /// Key of the run in the manifest store.
  #[serde(rename = "GUIDRun")]
  pub guid_run: String,
  /// The launched task or operation id.
  #[serde(rename = "Target")]
  pub target: String,
}

impl Engine {
  /// Run `task`, with its chain phases, in the background on `ctx`.
  ///
  /// The run is visible as `Running` in the manifest store before this
  /// returns. `ctx` must not be shared with the caller; pass a fork.
  pub fn launch_task(&self, task: TaskDefinition, mut ctx: ExecutionContext) -> LaunchTicket {
    let guid_run = run_id(&task.guid_task, Utc::now());
    let running = TaskManifestEntry::start(&task);
    self.manifests().record_task(&guid_run, &running);
    let ticket = LaunchTicket {
      guid_run: guid_run.clone(),
      target: task.guid_task.clone(),
    };

    let engine = self.clone();
    let work: BoxFuture<'static, ()> = Box::pin(async move {
      let entry = engine.run_chained(&task, &mut ctx).await;
      engine.manifests().record_task(&guid_run, &entry);
      info!(
        run_id = %guid_run,
        task_id = %task.guid_task,
        success = entry.success(),
        "launched_task_finished"
      );
    });
    let handle = tokio::spawn(work);

    let engine = self.clone();
    let run = ticket.guid_run.clone();
    watch(handle, move |reason| {
      let mut entry = engine.manifests().task(&run).unwrap_or(running);
      entry.push_log(format!("Launched task stopped unexpectedly: {}", reason));
      entry.finish(TaskStatus::Error, false);
      engine.manifests().record_task(&run, &entry);
    });

    info!(run_id = %ticket.guid_run, task_id = %ticket.target, "task_launched");
    ticket
  }

  /// Run `operation` in the background on `ctx`, after layering the
  /// operation's own seed state and staging override onto it.
  pub fn launch_operation(&self, operation: OperationDefinition, ctx: ExecutionContext) -> LaunchTicket {
    let mut ctx = self.operation_context(&operation, ctx);
    let manifest = OperationManifest::start(&operation);
    self.manifests().record_operation(&manifest);
    let running = manifest.clone();
    let ticket = LaunchTicket {
      guid_run: manifest.guid_run.clone(),
      target: operation.guid_operation.clone(),
    };

    let engine = self.clone();
    let work: BoxFuture<'static, ()> = Box::pin(async move {
      engine
        .run_operation_with_manifest(&operation, &mut ctx, manifest)
        .await;
    });
    let handle = tokio::spawn(work);

    let engine = self.clone();
    watch(handle, move |reason| {
      let mut manifest = engine.manifests().operation(&running.guid_run).unwrap_or(running);
      manifest.abort(format!("Launched operation stopped unexpectedly: {}", reason));
      engine.manifests().record_operation(&manifest);
    });

    info!(run_id = %ticket.guid_run, operation_id = %ticket.target, "operation_launched");
    ticket
  }
}

/// Call `on_abort` if the spawned work behind `handle` panics, so its
/// snapshot does not stay `Running`.
fn watch(handle: JoinHandle<()>, on_abort: impl FnOnce(String) + Send + 'static) {
  tokio::spawn(async move {
    if let Err(e) = handle.await {
      error!(error = %e, "launched_run_aborted");
      on_abort(e.to_string());
    }
  });
}
