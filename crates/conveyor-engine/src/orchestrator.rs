//! Sequential operation execution.

use std::path::PathBuf;

use conveyor_config::OperationDefinition;
use conveyor_state::{ExecutionContext, StagingResolver};
use tracing::{error, info, instrument, warn};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::result::OperationManifest;

impl Engine {
  /// Execute an operation's tasks in order against one shared context.
  ///
  /// Errors only when the definition is malformed. A task id that does
  /// not resolve is logged and skipped.
  #[instrument(
    name = "operation_execute",
    skip(self, operation),
    fields(operation_id = %operation.guid_operation)
  )]
  pub async fn execute_operation(
    &self,
    operation: &OperationDefinition,
  ) -> Result<OperationManifest, EngineError> {
    operation.validate()?;
    let mut ctx = self.operation_context(operation, self.new_context());
    Ok(self.run_operation_in_context(operation, &mut ctx).await)
  }

  /// Load an operation from the store and execute it.
  pub async fn execute_operation_by_id(&self, guid: &str) -> Result<OperationManifest, EngineError> {
    let operation = self.lookup_operation(guid).await?;
    self.execute_operation(&operation).await
  }

  /// Run `operation` against an existing context. Used directly by
  /// generated child operations that must share their parent's state.
  pub(crate) async fn run_operation_in_context(
    &self,
    operation: &OperationDefinition,
    ctx: &mut ExecutionContext,
  ) -> OperationManifest {
    let manifest = OperationManifest::start(operation);
    self.manifests().record_operation(&manifest);
    self.run_operation_with_manifest(operation, ctx, manifest).await
  }

  /// Layer `operation`'s seed state and staging override onto `base`.
  pub(crate) fn operation_context(
    &self,
    operation: &OperationDefinition,
    mut base: ExecutionContext,
  ) -> ExecutionContext {
    if let Some(seed) = &operation.global_state {
      base.merge_global(seed);
    }
    base.staging_path = Some(match operation.staging_path.as_deref().map(str::trim) {
      Some(path) if !path.is_empty() => PathBuf::from(path),
      _ => self.staging_root(&base),
    });
    base
  }

  /// Run `operation`, reporting into a manifest already recorded as
  /// `Running`.
  pub(crate) async fn run_operation_with_manifest(
    &self,
    operation: &OperationDefinition,
    ctx: &mut ExecutionContext,
    mut manifest: OperationManifest,
  ) -> OperationManifest {
    info!(
      operation_id = %operation.guid_operation,
      run_id = %manifest.guid_run,
      task_count = operation.tasks.len(),
      "operation_started"
    );

    let staging = self.staging_root(ctx);
    if let Err(e) = tokio::fs::create_dir_all(&staging).await {
      manifest.push_log(format!(
        "Could not create staging directory {}: {}",
        staging.display(),
        e
      ));
    }

    let mut skipped = 0;
    for guid in &operation.tasks {
      let task = match self.lookup_task(guid).await {
        Ok(task) => task,
        Err(e) => {
          warn!(run_id = %manifest.guid_run, task_id = %guid, error = %e, "task_skipped");
          manifest.push_log(format!("Task '{}' skipped: {}", guid, e));
          skipped += 1;
          continue;
        }
      };

      let result = self.run_chained(&task, ctx).await;
      manifest.push_log(format!(
        "Task '{}' finished: {:?} (success: {})",
        task.label(),
        result.status(),
        result.success()
      ));
      manifest.push_result(result);
      self.manifests().record_operation(&manifest);
    }

    manifest.finalize(skipped);
    let summary = manifest.summary.clone();
    manifest.push_log(summary);

    if manifest.success() {
      info!(
        run_id = %manifest.guid_run,
        elapsed_ms = manifest.elapsed_ms,
        "operation_completed"
      );
    } else {
      error!(
        run_id = %manifest.guid_run,
        elapsed_ms = manifest.elapsed_ms,
        "operation_failed"
      );
    }

    if self.settings().write_manifest_audit
      && let Err(reason) = self.write_audit(&staging, &manifest).await
    {
      manifest.push_log(reason);
    }
    self.manifests().record_operation(&manifest);

    manifest
  }

  /// Best-effort audit copy at `{staging}/Manifest_{GUIDOperation}.json`.
  /// On failure returns the line to add to the manifest log.
  async fn write_audit(&self, staging: &std::path::Path, manifest: &OperationManifest) -> Result<(), String> {
    let name = format!("Manifest_{}.json", manifest.guid_operation);
    let Some(path) = StagingResolver::resolve_file(staging, &name) else {
      warn!(run_id = %manifest.guid_run, file = %name, "manifest_audit_skipped");
      return Err(format!("Audit file skipped: '{}' is not a safe staging file name", name));
    };
    let content = serde_json::to_vec_pretty(manifest).map_err(|e| {
      warn!(run_id = %manifest.guid_run, error = %e, "manifest_audit_failed");
      format!("Audit file could not be serialized: {}", e)
    })?;
    tokio::fs::write(&path, content).await.map_err(|e| {
      warn!(run_id = %manifest.guid_run, path = %path.display(), error = %e, "manifest_audit_failed");
      format!("Audit file {} could not be written: {}", path.display(), e)
    })
  }
}
