//! Staging-file task types.
//!
//! Every file name is relative to the run's staging root and goes through
//! the staging resolver, so `..` and absolute names are refused.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use globset::Glob;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::TaskError;
use crate::output::write_file;
use crate::params::{Params, scalar_text};
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;
use crate::template::expand_logged;

/// Content format for read and write types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
  Json,
  Text,
  /// Handled as text.
  Xml,
  /// Base64 in state, raw bytes on disk.
  Binary,
}

/// `Read{JSON,Text,XML,Binary}`.
pub struct ReadFile {
  format: FileFormat,
}

/// `Write{JSON,Text,XML,Binary}`.
pub struct WriteFile {
  format: FileFormat,
}

/// `ListFiles`: names under a staging directory, optionally filtered by a
/// glob.
pub struct ListFiles;

/// `CopyFile`: copy one staging file to another staging name.
pub struct CopyFile;

impl ReadFile {
  pub fn new(format: FileFormat) -> Self {
    Self { format }
  }
}

impl WriteFile {
  pub fn new(format: FileFormat) -> Self {
    Self { format }
  }
}

/// The `File` parameter, placeholders expanded.
fn file_param(params: &Params<'_>, key: &str, ctx: &ExecutionContext, log: &mut Vec<String>) -> Result<String, TaskError> {
  let name = params.required_str(key)?;
  Ok(expand_logged(&name, ctx, log))
}

#[async_trait]
impl TaskType for ReadFile {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = self.run(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

impl ReadFile {
  async fn run(
    &self,
    task: &TaskDefinition,
    ctx: &ExecutionContext,
    engine: &Engine,
    log: &mut Vec<String>,
  ) -> Result<TaskOutcome, TaskError> {
    let params = Params::new(task);
    let name = file_param(&params, "File", ctx, log)?;
    let path = engine.staging_file(ctx, &name)?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| TaskError::io(&path, e))?;
    log.push(format!("Read {} bytes from '{}'", bytes.len(), name));

    Ok(match self.format {
      FileFormat::Json => {
        let value: Value = serde_json::from_slice(&bytes)
          .map_err(|e| TaskError::failed(format!("'{}' is not valid JSON: {}", name, e)))?;
        TaskOutcome::complete(value)
      }
      FileFormat::Text | FileFormat::Xml => {
        TaskOutcome::complete(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
      }
      FileFormat::Binary => {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        TaskOutcome::complete(Value::String(encoded)).with_binary(Bytes::from(bytes))
      }
    })
  }
}

#[async_trait]
impl TaskType for WriteFile {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = self.run(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

impl WriteFile {
  async fn run(
    &self,
    task: &TaskDefinition,
    ctx: &ExecutionContext,
    engine: &Engine,
    log: &mut Vec<String>,
  ) -> Result<TaskOutcome, TaskError> {
    let params = Params::new(task);
    let name = file_param(&params, "File", ctx, log)?;
    let path = engine.staging_file(ctx, &name)?;

    let content = params
      .value_or_address(ctx, "Content", "Source")
      .or_else(|| params.value_or_address(ctx, "Value", "Address"))
      .ok_or_else(|| TaskError::failed("Nothing to write: set 'Content' or a 'Source' address"))?;

    let bytes = match self.format {
      FileFormat::Json => {
        serde_json::to_vec_pretty(&content).map_err(|e| TaskError::failed(e.to_string()))?
      }
      FileFormat::Text | FileFormat::Xml => scalar_text(&content).into_bytes(),
      FileFormat::Binary => {
        let Value::String(encoded) = &content else {
          return Err(TaskError::invalid("Content", "binary content must be a base64 string"));
        };
        base64::engine::general_purpose::STANDARD
          .decode(encoded.trim())
          .map_err(|e| TaskError::invalid("Content", format!("invalid base64: {}", e)))?
      }
    };

    write_file(&path, &bytes).await?;
    log.push(format!("Wrote {} bytes to '{}'", bytes.len(), name));

    Ok(TaskOutcome::complete(json!({
      "File": name,
      "Path": path.display().to_string(),
      "Bytes": bytes.len(),
    })))
  }
}

#[async_trait]
impl TaskType for ListFiles {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = list_files(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn list_files(
  task: &TaskDefinition,
  ctx: &ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let dir = match params.str("Path") {
    Some(sub) => {
      let sub = expand_logged(&sub, ctx, log);
      engine.staging_file(ctx, &sub)?
    }
    None => engine.staging_root(ctx),
  };

  let matcher = match params.str("Pattern") {
    Some(pattern) => Some(
      Glob::new(&pattern)
        .map_err(|e| TaskError::invalid("Pattern", e.to_string()))?
        .compile_matcher(),
    ),
    None => None,
  };
  let recursive = params.bool("Recursive", false)?;

  let mut names = Vec::new();
  collect_names(&dir, &dir, recursive, &mut names).await?;
  names.retain(|name| matcher.as_ref().is_none_or(|m| m.is_match(name)));
  names.sort();

  log.push(format!("Found {} file(s) in {}", names.len(), dir.display()));
  Ok(TaskOutcome::complete(json!(names)))
}

/// Regular-file names under `dir`, relative to `base`, with `/`
/// separators.
async fn collect_names(
  base: &Path,
  dir: &Path,
  recursive: bool,
  names: &mut Vec<String>,
) -> Result<(), TaskError> {
  let mut pending = vec![dir.to_path_buf()];
  while let Some(current) = pending.pop() {
    let mut entries = tokio::fs::read_dir(&current)
      .await
      .map_err(|e| TaskError::io(&current, e))?;
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| TaskError::io(&current, e))?
    {
      let path = entry.path();
      let file_type = entry.file_type().await.map_err(|e| TaskError::io(&path, e))?;
      if file_type.is_dir() {
        if recursive {
          pending.push(path);
        }
        continue;
      }
      if let Ok(relative) = path.strip_prefix(base) {
        let name = relative
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/");
        names.push(name);
      }
    }
  }
  Ok(())
}

#[async_trait]
impl TaskType for CopyFile {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = copy_file(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn copy_file(
  task: &TaskDefinition,
  ctx: &ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let source_name = file_param(&params, "SourceFile", ctx, log)?;
  let target_name = file_param(&params, "TargetFile", ctx, log)?;
  let source = engine.staging_file(ctx, &source_name)?;
  let target = engine.staging_file(ctx, &target_name)?;

  if !params.bool("Overwrite", true)? && tokio::fs::try_exists(&target).await.unwrap_or(false) {
    return Err(TaskError::failed(format!(
      "'{}' already exists and Overwrite is false",
      target_name
    )));
  }
  if let Some(parent) = target.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .map_err(|e| TaskError::io(parent, e))?;
  }
  let copied = tokio::fs::copy(&source, &target)
    .await
    .map_err(|e| TaskError::io(&source, e))?;

  log.push(format!("Copied '{}' to '{}' ({} bytes)", source_name, target_name, copied));
  Ok(TaskOutcome::complete(json!({
    "Source": source_name,
    "Target": target_name,
    "Bytes": copied,
  })))
}
