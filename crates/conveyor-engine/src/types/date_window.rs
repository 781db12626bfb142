use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone, Utc};
use conveyor_config::TaskDefinition;
use conveyor_state::ExecutionContext;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::TaskError;
use crate::params::Params;
use crate::registry::{TaskType, settle};
use crate::result::TaskOutcome;

/// `DateWindow`: the most recently completed clock-aligned window of
/// `Minutes` minutes, stepped back `Offset` windows.
pub struct DateWindow;

/// Start and end of a window; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

/// Windows are aligned to the Unix epoch, so 60-minute windows start on
/// the hour and 1440-minute windows at midnight UTC.
pub fn completed_window(now: DateTime<Utc>, minutes: u32, offset: u32) -> Option<Window> {
  if minutes == 0 {
    return None;
  }
  let size = i64::from(minutes) * 60;
  let aligned = now.timestamp().div_euclid(size) * size;
  let end = aligned - i64::from(offset) * size;
  let start = end - size;
  Some(Window {
    start: Utc.timestamp_opt(start, 0).single()?,
    end: Utc.timestamp_opt(end, 0).single()?,
  })
}

#[async_trait]
impl TaskType for DateWindow {
  async fn execute(
    &self,
    task: &TaskDefinition,
    _ctx: &mut ExecutionContext,
    _engine: &Engine,
  ) -> TaskOutcome {
    settle(window_output(task, Utc::now()), Vec::new())
  }
}

fn window_output(task: &TaskDefinition, now: DateTime<Utc>) -> Result<TaskOutcome, TaskError> {
  let params = Params::new(task);
  let minutes = params.u64("Minutes")?.unwrap_or(60);
  let minutes = u32::try_from(minutes).map_err(|_| TaskError::invalid("Minutes", "too large"))?;
  let offset = params.u64("Offset")?.unwrap_or(0);
  let offset = u32::try_from(offset).map_err(|_| TaskError::invalid("Offset", "too large"))?;

  let window = completed_window(now, minutes, offset)
    .ok_or_else(|| TaskError::invalid("Minutes", "must be a positive number of minutes"))?;

  let mut output = json!({
    "Start": window.start.to_rfc3339(),
    "End": window.end.to_rfc3339(),
    "StartEpoch": window.start.timestamp(),
    "EndEpoch": window.end.timestamp(),
    "Minutes": minutes,
  });

  if let Some(format) = params.str("Format") {
    if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
      return Err(TaskError::invalid("Format", format!("'{}' is not a valid strftime format", format)));
    }
    output["StartFormatted"] = Value::String(window.start.format(&format).to_string());
    output["EndFormatted"] = Value::String(window.end.format(&format).to_string());
  }

  let line = format!(
    "Window {} to {} ({} minutes)",
    window.start.to_rfc3339(),
    window.end.to_rfc3339(),
    minutes
  );
  Ok(TaskOutcome::complete(output).with_log(vec![line]))
}
