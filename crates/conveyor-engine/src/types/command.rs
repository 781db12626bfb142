//! Shell command task types.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_config::TaskDefinition;
use conveyor_state::{ExecutionContext, parse_address, resolve_value};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as Process;
use tokio::time::timeout;

use crate::engine::Engine;
use crate::error::TaskError;
use crate::params::{Params, scalar_text};
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;
use crate::template::{expand_logged, expand_with};

/// `Command`: run one shell command.
pub struct Command;

/// `CommandEach`: run a command template once per element of a list.
pub struct CommandEach;

/// Captured result of one shell invocation.
struct ShellRun {
  code: Option<i32>,
  stdout: String,
}

impl ShellRun {
  fn succeeded(&self) -> bool {
    self.code == Some(0)
  }
}

#[async_trait]
impl TaskType for Command {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = run_command(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn run_command(
  task: &TaskDefinition,
  ctx: &ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let command = command_line(&params)?;
  let command = expand_logged(&command, ctx, log);

  let run = run_shell(engine, ctx, &params, &command, log).await?;
  let output = Value::String(run.stdout.trim().to_string());
  if run.succeeded() {
    Ok(TaskOutcome::complete(output))
  } else {
    Ok(TaskOutcome::failure(
      output,
      format!("Command exited with status {}", exit_label(run.code)),
    ))
  }
}

#[async_trait]
impl TaskType for CommandEach {
  async fn execute(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
    engine: &Engine,
  ) -> TaskOutcome {
    let mut log = Vec::new();
    let result = run_each(task, ctx, engine, &mut log).await;
    settle(result, log)
  }
}

async fn run_each(
  task: &TaskDefinition,
  ctx: &ExecutionContext,
  engine: &Engine,
  log: &mut Vec<String>,
) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let template = command_line(&params)?;
  let continue_on_error = params.bool("ContinueOnError", true)?;

  let items = match params.value_or_address(ctx, "Values", "Source") {
    Some(Value::Array(items)) => items,
    Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
    Some(Value::Null) | None => {
      return Err(TaskError::failed(
        "CommandEach needs a 'Values' list or a 'Source' address that resolves to one",
      ));
    }
    Some(other) => vec![other],
  };

  let count = items.len();
  let mut iterations = Vec::with_capacity(count);
  let mut failures = 0;

  for (index, item) in items.iter().enumerate() {
    let lookup = |name: &str| -> Option<String> {
      match name {
        "Value" => Some(scalar_text(item)),
        "Index" => Some(index.to_string()),
        "Count" => Some(count.to_string()),
        _ => {
          if let Some(path) = name.strip_prefix("Value.") {
            let segments = parse_address(path)?;
            return resolve_value(item, &segments).map(scalar_text);
          }
          ctx.resolve(name).map(scalar_text)
        }
      }
    };
    let expansion = expand_with(&template, lookup);
    for name in &expansion.unresolved {
      log.push(format!("Warning: placeholder '{{{}}}' did not resolve", name));
    }

    log.push(format!("[{}/{}] {}", index + 1, count, expansion.text));
    let (succeeded, record) = match run_shell(engine, ctx, &params, &expansion.text, log).await {
      Ok(run) => (
        run.succeeded(),
        json!({
          "Index": index,
          "Value": item,
          "ExitCode": run.code,
          "Output": run.stdout.trim(),
          "Success": run.succeeded(),
        }),
      ),
      Err(e) => {
        log.push(e.to_string());
        (
          false,
          json!({"Index": index, "Value": item, "ExitCode": null, "Output": "", "Success": false}),
        )
      }
    };
    iterations.push(record);

    if !succeeded {
      failures += 1;
      if !continue_on_error {
        log.push(format!(
          "Stopping after iteration {} failed (ContinueOnError is false)",
          index + 1
        ));
        break;
      }
    }
  }

  let output = json!({
    "Count": count,
    "Executed": iterations.len(),
    "Failed": failures,
    "Results": iterations,
  });
  if failures == 0 {
    Ok(TaskOutcome::complete(output))
  } else {
    Ok(TaskOutcome::failure(
      output,
      format!("{} of {} iteration(s) failed", failures, count),
    ))
  }
}

/// `Command`, with `Parameters` (string or list) appended. Either alone is
/// enough.
fn command_line(params: &Params<'_>) -> Result<String, TaskError> {
  let extra = match params.value("Parameters") {
    None => None,
    Some(Value::Array(items)) => Some(
      items
        .iter()
        .map(|v| shell_quote(&scalar_text(v)))
        .collect::<Vec<_>>()
        .join(" "),
    ),
    Some(other) => Some(scalar_text(other)),
  }
  .filter(|s| !s.trim().is_empty());

  match (params.str("Command"), extra) {
    (Some(command), Some(extra)) => Ok(format!("{} {}", command, extra)),
    (Some(command), None) => Ok(command),
    (None, Some(extra)) => Ok(extra),
    (None, None) => Err(TaskError::missing("Command")),
  }
}

/// Quote an argument for `sh` unless it is plainly safe.
fn shell_quote(arg: &str) -> String {
  let safe = !arg.is_empty()
    && arg
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
  if safe {
    arg.to_string()
  } else {
    format!("'{}'", arg.replace('\'', r"'\''"))
  }
}

fn exit_label(code: Option<i32>) -> String {
  code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

async fn run_shell(
  engine: &Engine,
  ctx: &ExecutionContext,
  params: &Params<'_>,
  command: &str,
  log: &mut Vec<String>,
) -> Result<ShellRun, TaskError> {
  let settings = engine.settings();
  let limit = match params.u64("Timeout")? {
    Some(ms) => Duration::from_millis(ms),
    None => settings.command_timeout(),
  };

  let mut process = shell(command);
  process
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
  let root = engine.staging_root(ctx);
  if root.is_dir() {
    process.current_dir(&root);
  }

  let mut child = process
    .spawn()
    .map_err(|e| TaskError::failed(format!("Failed to start command: {}", e)))?;
  let (stdout, stderr) = (child.stdout.take(), child.stderr.take());
  let max = settings.max_output_bytes;

  let collected = timeout(limit, async {
    tokio::try_join!(read_capped(stdout, max), read_capped(stderr, max), child.wait())
  })
  .await;
  let (stdout, stderr, status) = match collected {
    Ok(Ok(parts)) => parts,
    Ok(Err(e)) => return Err(TaskError::failed(format!("Failed to read command output: {}", e))),
    Err(_) => {
      return Err(TaskError::failed(format!(
        "Command timed out after {}ms",
        limit.as_millis()
      )));
    }
  };

  for (stream, captured) in [("stdout", &stdout), ("stderr", &stderr)] {
    if captured.truncated {
      log.push(format!("{} truncated at {} bytes", stream, max));
    }
  }
  let stdout = captured_text(&stdout);
  let stderr = captured_text(&stderr);
  let code = status.code();

  log.push(format!("Exit code: {}", exit_label(code)));
  if !stdout.trim().is_empty() {
    log.push(format!("stdout: {}", excerpt(&stdout, settings.log_excerpt_chars)));
  }
  if !stderr.trim().is_empty() {
    log.push(format!("stderr: {}", excerpt(&stderr, settings.log_excerpt_chars)));
  }

  Ok(ShellRun { code, stdout })
}

#[cfg(unix)]
fn shell(command: &str) -> Process {
  let mut process = Process::new("sh");
  process.arg("-c").arg(command);
  process
}

#[cfg(windows)]
fn shell(command: &str) -> Process {
  let mut process = Process::new("cmd");
  process.arg("/C").arg(command);
  process
}

/// Output kept from one pipe.
#[derive(Default)]
struct Captured {
  bytes: Vec<u8>,
  truncated: bool,
}

/// Keep the first `max` bytes of `pipe` and discard the rest, so memory
/// stays bounded however much the command writes.
async fn read_capped<R>(pipe: Option<R>, max: usize) -> std::io::Result<Captured>
where
  R: AsyncRead + Unpin,
{
  let mut captured = Captured::default();
  let Some(mut pipe) = pipe else {
    return Ok(captured);
  };
  (&mut pipe).take(max as u64).read_to_end(&mut captured.bytes).await?;
  captured.truncated = tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await? > 0;
  Ok(captured)
}

fn captured_text(captured: &Captured) -> String {
  String::from_utf8_lossy(&captured.bytes).into_owned()
}

fn excerpt(text: &str, max_chars: usize) -> String {
  let text = text.trim();
  if text.chars().count() <= max_chars {
    return text.to_string();
  }
  let cut: String = text.chars().take(max_chars).collect();
  format!("{}...", cut)
}
