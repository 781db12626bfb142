//! Writing a task's result to its destination and persist targets.

use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::Value;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::result::TaskOutcome;

/// Store a successful outcome at `Destination` and any `Persist` target.
///
/// Failed outcomes are not stored. A persist failure is returned so the
/// caller can turn the task into an error.
pub(crate) async fn store_result(
  engine: &Engine,
  task: &TaskDefinition,
  ctx: &mut ExecutionContext,
  outcome: &TaskOutcome,
  log: &mut Vec<String>,
) -> Result<(), TaskError> {
  if !outcome.success {
    return Ok(());
  }

  ctx.set(task.destination(), outcome.output.clone());

  let Some(persist) = &task.persist else {
    return Ok(());
  };

  if let Some(address) = persist.address() {
    ctx.set(address, outcome.output.clone());
    log.push(format!("Persisted result to state at '{}'", address));
  }

  if let Some(name) = persist.file() {
    let path = engine.staging_file(ctx, name)?;
    let bytes = match (&outcome.binary, &outcome.output) {
      (Some(raw), _) => raw.to_vec(),
      (None, Value::String(text)) => text.clone().into_bytes(),
      (None, other) => serde_json::to_vec_pretty(other).map_err(|e| TaskError::failed(e.to_string()))?,
    };
    write_file(&path, &bytes).await?;
    log.push(format!("Persisted result to file '{}' ({} bytes)", name, bytes.len()));
  }

  Ok(())
}

/// Write `bytes` to `path`, creating parent directories first.
pub(crate) async fn write_file(path: &std::path::Path, bytes: &[u8]) -> Result<(), TaskError> {
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .map_err(|e| TaskError::io(parent, e))?;
  }
  tokio::fs::write(path, bytes)
    .await
    .map_err(|e| TaskError::io(path, e))
}
