use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::json;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::params::Params;
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;

/// `LaunchTask`: start `TargetTask` in the background and return at once.
pub struct LaunchTask;

/// `LaunchOperation`: start `TargetOperation` in the background and
/// return at once.
pub struct LaunchOperation;

/// The child's context: a deep copy of the parent's, with the optional
/// `GlobalState` parameter merged over it.
fn child_context(params: &Params<'_>, ctx: &ExecutionContext) -> Result<ExecutionContext, TaskError> {
  let mut child = ctx.fork();
  if let Some(seed) = params.object("GlobalState")? {
    child.merge_global(seed);
  }
  Ok(child)
}

#[async_trait]
impl TaskType for LaunchTask {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = launch_task(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn launch_task(
  task: &TaskDefinition,
  ctx: &ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let target = params.required_str("TargetTask")?;
  let child = engine
    .lookup_task(&target)
    .await
    .map_err(|e| TaskError::failed(format!("TargetTask '{}' could not be loaded: {}", target, e)))?;
  child
    .validate()
    .map_err(|e| TaskError::failed(format!("TargetTask '{}' is invalid: {}", target, e)))?;

  let ticket = engine.launch_task(child, child_context(&params, ctx)?);
  log.push(format!("Launched task '{}' as run {}", target, ticket.guid_run));
  Ok(TaskOutcome::launched(json!({
    "GUIDRun": ticket.guid_run,
    "TargetTask": ticket.target,
    "Async": true,
  })))
}

#[async_trait]
impl TaskType for LaunchOperation {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = launch_operation(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn launch_operation(
  task: &TaskDefinition,
  ctx: &ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let target = params.required_str("TargetOperation")?;
  let operation = engine
    .lookup_operation(&target)
    .await
    .map_err(|e| TaskError::failed(format!("TargetOperation '{}' could not be loaded: {}", target, e)))?;
  operation
    .validate()
    .map_err(|e| TaskError::failed(format!("TargetOperation '{}' is invalid: {}", target, e)))?;

  let ticket = engine.launch_operation(operation, child_context(&params, ctx)?);
  log.push(format!("Launched operation '{}' as run {}", target, ticket.guid_run));
  Ok(TaskOutcome::launched(json!({
    "GUIDRun": ticket.guid_run,
    "TargetOperation": ticket.target,
    "Async": true,
  })))
}
