use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::{ExecutionContext, Segment, parse_address, resolve_value};
use serde_json::Value;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::params::Params;
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;

/// `CollectValues`: project a field out of every record of a source list.
///
/// `Source` (address) or `Values` (literal) supplies the elements; an
/// object source contributes its values. `RecordPath` steps into each
/// element first, and an array found there contributes each of its items
/// as a record. `Field` picks the value from each record; without it the
/// record itself is collected. `Flatten` splices array values in and
/// `Unique` drops repeats, keeping first occurrences.
pub struct CollectValues;

#[async_trait]
impl TaskType for CollectValues {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    _engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = collect(task, ctx, &mut log);
    settle(result, log)
  }
}

fn collect(task: &TaskDefinition, ctx: &ExecutionContext, log: &mut Vec<String>) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let source = params
    .value_or_address(ctx, "Values", "Source")
    .ok_or_else(|| TaskError::failed("CollectValues needs a 'Values' list or a resolvable 'Source' address"))?;

  let record_path = optional_path(&params, "RecordPath")?;
  let field = optional_path(&params, "Field")?;
  let flatten = params.bool("Flatten", false)?;
  let unique = params.bool("Unique", false)?;

  let elements: Vec<&Value> = match &source {
    Value::Array(items) => items.iter().collect(),
    Value::Object(map) => map.values().collect(),
    Value::Null => Vec::new(),
    other => vec![other],
  };

  let records = elements.into_iter().flat_map(|element| {
    let target = match &record_path {
      Some(path) => resolve_value(element, path),
      None => Some(element),
    };
    match target {
      Some(Value::Array(items)) if record_path.is_some() => items.iter().collect::<Vec<_>>(),
      Some(value) => vec![value],
      None => Vec::new(),
    }
  });

  let mut collected: Vec<Value> = Vec::new();
  let mut missing = 0;
  for record in records {
    let value = match &field {
      Some(path) => resolve_value(record, path),
      None => Some(record),
    };
    match value {
      None | Some(Value::Null) => missing += 1,
      Some(Value::Array(items)) if flatten => collected.extend(items.iter().cloned()),
      Some(value) => collected.push(value.clone()),
    }
  }

  if unique {
    let mut seen = Vec::with_capacity(collected.len());
    collected.retain(|value| {
      if seen.contains(value) {
        false
      } else {
        seen.push(value.clone());
        true
      }
    });
  }

  if missing > 0 {
    log.push(format!("{} record(s) had no value to collect", missing));
  }
  log.push(format!("Collected {} value(s)", collected.len()));
  Ok(TaskOutcome::complete(Value::Array(collected)))
}

fn optional_path(params: &Params<'_>, key: &str) -> Result<Option<Vec<Segment>>, TaskError> {
  match params.str(key) {
    None => Ok(None),
    Some(path) => parse_address(&path)
      .map(Some)
      .ok_or_else(|| TaskError::invalid(key, format!("'{}' is not a valid path", path))),
  }
}
