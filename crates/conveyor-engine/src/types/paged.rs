//! `GeneratePagedOperation`: fan a task template out into one task per
//! page and run the pages as a child operation.

use async_trait::async_trait;
use conveyor_config::{OperationDefinition, TaskDefinition};
use conveyor_state::ExecutionContext;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::TaskError;
use crate::output::write_file;
use crate::params::{Params, as_u64};
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;
use crate::template::expand_value;

pub struct GeneratePagedOperation;

const PAGED_TYPE: &str = "GeneratePagedOperation";

/// The tasks and operation generated for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedBatch {
  pub operation: OperationDefinition,
  pub tasks: Vec<TaskDefinition>,
}

/// Removes a batch's ephemeral registrations when dropped, whichever way
/// the generating task exits.
struct Registration<'a> {
  engine: &'a Engine,
  operation: String,
  tasks: Vec<String>,
}

impl Drop for Registration<'_> {
  fn drop(&mut self) {
    let ephemeral = self.engine.ephemeral();
    for guid in &self.tasks {
      ephemeral.remove_task(guid);
    }
    ephemeral.remove_operation(&self.operation);
  }
}

/// Number of pages needed for `count` records; zero when either side is
/// zero.
pub fn page_count(count: u64, size: u64) -> u64 {
  if size == 0 { 0 } else { count.div_ceil(size) }
}

/// Instantiate `template` once per page.
///
/// Every string in the template has `{PageStart}`, `{PageSize}`,
/// `{PageIndex}` and `{PageCount}` expanded; a string that is only a
/// placeholder becomes the number itself. Page `i` writes its result to
/// `{pages_address}[i]`.
pub fn generate_pages(
  batch_id: &str,
  template: &Value,
  count: u64,
  size: u64,
  pages_address: &str,
) -> Result<PagedBatch, TaskError> {
  let pages = page_count(count, size);
  let mut tasks = Vec::new();

  for index in 0..pages {
    let lookup = |name: &str| match name {
      "PageStart" => Some(json!(index * size)),
      "PageSize" => Some(json!(size)),
      "PageIndex" => Some(json!(index)),
      "PageCount" => Some(json!(pages)),
      _ => None,
    };
    let mut task: TaskDefinition = serde_json::from_value(expand_value(template, &lookup))
      .map_err(|e| TaskError::invalid("Template", e.to_string()))?;
    if task.task_type.trim().is_empty() {
      return Err(TaskError::invalid("Template", "template has no Type"));
    }
    if task.task_type.trim().eq_ignore_ascii_case(PAGED_TYPE) {
      return Err(TaskError::invalid("Template", "pages cannot generate further paged operations"));
    }

    let base = if task.name.is_empty() { task.task_type.clone() } else { task.name.clone() };
    task.guid_task = format!("{}-page-{}", batch_id, index);
    task.name = format!("{} (page {} of {})", base, index + 1, pages);
    task.destination = Some(format!("{}[{}]", pages_address, index));
    tasks.push(task);
  }

  let mut operation = OperationDefinition::new(batch_id, tasks.iter().map(|t| t.guid_task.clone()).collect());
  operation.name = format!("Paged operation {} ({} page(s))", batch_id, pages);
  Ok(PagedBatch { operation, tasks })
}

#[async_trait]
impl TaskType for GeneratePagedOperation {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = run(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn run(
  task: &TaskDefinition,
  ctx: &mut ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);

  let template = match (params.value("Template"), params.str("TemplateTask")) {
    (Some(template @ Value::Object(_)), _) => template.clone(),
    (Some(_), _) => return Err(TaskError::invalid("Template", "expected a task definition object")),
    (None, Some(guid)) if guid == task.guid_task => {
      return Err(TaskError::invalid("TemplateTask", "a task cannot page itself"));
    }
    (None, Some(guid)) => {
      let template = engine
        .lookup_task(&guid)
        .await
        .map_err(|e| TaskError::failed(format!("TemplateTask '{}' could not be loaded: {}", guid, e)))?;
      serde_json::to_value(template).map_err(|e| TaskError::failed(e.to_string()))?
    }
    (None, None) => return Err(TaskError::missing("Template")),
  };

  let count = record_count(&params, ctx)?;
  let size = params
    .u64("PageSize")?
    .filter(|size| *size > 0)
    .ok_or_else(|| TaskError::invalid("PageSize", "must be a positive integer"))?;
  let pages_address = params.str("PagesAddress").unwrap_or_else(|| "Pages".to_string());
  let auto_execute = params.bool("AutoExecute", true)?;

  let batch_id = format!("{}-paged-{}", task.guid_task, &uuid::Uuid::new_v4().simple().to_string()[..8]);
  let batch = generate_pages(&batch_id, &template, count, size, &pages_address)?;
  let page_total = batch.tasks.len();
  log.push(format!(
    "Generated {} page task(s) for {} record(s) at {} per page",
    page_total, count, size
  ));

  let _registration = Registration {
    engine,
    operation: batch.operation.guid_operation.clone(),
    tasks: batch.tasks.iter().map(|t| t.guid_task.clone()).collect(),
  };
  for page in &batch.tasks {
    engine.ephemeral().put_task(page.clone());
  }
  engine.ephemeral().put_operation(batch.operation.clone());
  info!(
    task_id = %task.guid_task,
    operation_id = %batch_id,
    pages = page_total,
    "paged_operation_generated"
  );

  write_audit(engine, ctx, &batch, log).await;

  let mut output = json!({
    "GUIDOperation": batch_id,
    "RecordCount": count,
    "PageSize": size,
    "PageCount": page_total,
    "PagesAddress": pages_address,
    "Tasks": batch.operation.tasks,
    "Executed": auto_execute,
  });

  if !auto_execute {
    log.push("AutoExecute is off; generated operation was not run".to_string());
    return Ok(TaskOutcome::complete(output));
  }

  ctx.set(&pages_address, Value::Array(Vec::new()));
  let manifest = engine.run_operation_in_context(&batch.operation, ctx).await;
  log.push(manifest.summary.clone());
  let success = manifest.success();
  output["Result"] = serde_json::to_value(&manifest).map_err(|e| TaskError::failed(e.to_string()))?;

  if success {
    Ok(TaskOutcome::complete(output))
  } else {
    Ok(TaskOutcome::failure(output, format!("Paged operation '{}' failed", batch_id)))
  }
}

/// `RecordCount` as a number, a numeric string, or an address holding
/// either.
fn record_count(params: &Params<'_>, ctx: &ExecutionContext) -> Result<u64, TaskError> {
  let value = params.value("RecordCount").ok_or_else(|| TaskError::missing("RecordCount"))?;
  if let Some(count) = as_u64(value) {
    return Ok(count);
  }
  let Value::String(address) = value else {
    return Err(TaskError::invalid("RecordCount", format!("expected a count, got {}", value)));
  };
  let resolved = ctx
    .resolve(address)
    .ok_or_else(|| TaskError::invalid("RecordCount", format!("address '{}' did not resolve", address)))?;
  as_u64(resolved).ok_or_else(|| {
    TaskError::invalid(
      "RecordCount",
      format!("'{}' holds {}, not a record count", address, resolved),
    )
  })
}

/// Best-effort copy of the generated batch at
/// `{staging}/PagedOperation_{GUIDOperation}.json`.
async fn write_audit(engine: &Engine, ctx: &ExecutionContext, batch: &PagedBatch, log: &mut Vec<String>) {
  let name = format!("PagedOperation_{}.json", batch.operation.guid_operation);
  let path = match engine.staging_file(ctx, &name) {
    Ok(path) => path,
    Err(e) => {
      log.push(format!("Audit file skipped: {}", e));
      return;
    }
  };
  let document = json!({
    "Operation": batch.operation,
    "Tasks": batch.tasks,
  });
  let written = match serde_json::to_vec_pretty(&document) {
    Ok(bytes) => write_file(&path, &bytes).await,
    Err(e) => Err(TaskError::failed(e.to_string())),
  };
  if let Err(e) = written {
    warn!(operation_id = %batch.operation.guid_operation, error = %e, "paged_audit_failed");
    log.push(format!("Audit file could not be written: {}", e));
  }
}
