use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::params::{Params, truthy};
use crate::registry::TaskType;
use crate::result::{TaskOutcome, TaskStatus};

/// `Conditional`: run `TrueTask` or `FalseTask` depending on a value.
///
/// The branch task runs standalone, one level deep. A branch with no task
/// is a successful no-op.
pub struct Conditional;

#[async_trait]
impl TaskType for Conditional {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let params = Params::new(task);
    let mut log = Vec::new();

    let value = params.value_or_address(ctx, "Value", "Address");
    if value.is_none()
      && let Some(address) = params.str("Address")
    {
      log.push(format!("Address '{}' did not resolve; treating as false", address));
    }
    let condition = value.as_ref().is_some_and(truthy);
    let branch = if condition { "TrueTask" } else { "FalseTask" };
    log.push(format!("Condition is {}; taking {}", condition, branch));

    let Some(target) = params.str(branch) else {
      log.push(format!("No {} configured; nothing to run", branch));
      return TaskOutcome::complete(json!({
        "Condition": condition,
        "Branch": branch,
        "Task": Value::Null,
      }))
      .with_log(log);
    };

    let child = match engine.lookup_task(&target).await {
      Ok(child) => child,
      Err(e) => {
        return TaskOutcome::failure(
          json!({"Condition": condition, "Branch": branch, "Task": target}),
          format!("{} '{}' could not be loaded: {}", branch, target, e),
        )
        .with_log(log);
      }
    };

    let result = engine.run_standalone(&child, ctx).await;
    let status = match result.status() {
      TaskStatus::Complete => TaskStatus::Complete,
      _ => TaskStatus::Error,
    };
    let success = result.success();
    log.push(format!(
      "{} '{}' finished: {:?} (success: {})",
      branch,
      target,
      result.status(),
      success
    ));

    let output = json!({
      "Condition": condition,
      "Branch": branch,
      "Task": target,
      "Result": result,
    });
    TaskOutcome {
      status,
      success,
      ..TaskOutcome::complete(output)
    }
    .with_log(log)
  }
}
