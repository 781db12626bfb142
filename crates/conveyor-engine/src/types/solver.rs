use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::TaskError;
use crate::expr::Program;
use crate::params::Params;
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;

/// `Solver`: evaluate `Expression` with global state as the record.
///
/// Assignments land in global state only when the whole program
/// evaluates; a failing statement leaves state untouched.
pub struct Solver;

#[async_trait]
impl TaskType for Solver {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    _engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = solve(task, ctx, &mut log);
    settle(result, log)
  }
}

fn solve(task: &TaskDefinition, ctx: &mut ExecutionContext, log: &mut Vec<String>) -> Result<TaskOutcome, TaskError> {
  let source = Params::new(task).required_str("Expression")?;
  let program = Program::parse(&source)?;

  let mut record = ctx.global_state.clone();
  let evaluation = program.evaluate(&mut record)?;

  for (address, value) in &evaluation.assigned {
    ctx.set(address, value.clone());
    log.push(format!("Assigned {} = {}", address, value));
  }

  Ok(TaskOutcome::complete(json!({
    "Result": evaluation.result,
    "Assigned": Value::Object(evaluation.assigned),
  })))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_assignments_merge_into_global_state() {
    let mut ctx = ExecutionContext::new();
    ctx.set("Count", json!(95));
    ctx.set("Size", json!(20));

    let task = TaskDefinition::new("s", "Solver")
      .with_param("Expression", "Paging.Pages = ceil(Count / Size); Paging.Pages * Size");
    let mut log = Vec::new();
    let outcome = solve(&task, &mut ctx, &mut log).unwrap();

    assert_eq!(outcome.output["Result"], json!(100));
    assert_eq!(outcome.output["Assigned"]["Paging.Pages"], json!(5));
    assert_eq!(ctx.resolve("Paging.Pages"), Some(&json!(5)));
    assert_eq!(log.len(), 1);
  }

  #[test]
  fn test_failed_evaluation_leaves_state_alone() {
    let mut ctx = ExecutionContext::new();
    let task = TaskDefinition::new("s", "Solver").with_param("Expression", "A = 1; B = 1 / 0");
    let mut log = Vec::new();
    assert!(matches!(solve(&task, &mut ctx, &mut log), Err(TaskError::Expression(_))));
    assert!(ctx.resolve("A").is_none());
  }
}
