use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::Value;

use crate::engine::Engine;
use crate::params::Params;
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;
use crate::template::expand_logged;

/// `TemplateString`: expand `{Address}` placeholders in `Template`.
pub struct TemplateString;

#[async_trait]
impl TaskType for TemplateString {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    _engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = Params::new(task)
      .required_str("Template")
      .map(|template| TaskOutcome::complete(Value::String(expand_logged(&template, ctx, &mut log))));
    settle(result, log)
  }
}
