//! Engine-wide settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Settings shared by every run the engine performs.
///
/// Every field has a default, so an empty JSON object is a valid settings
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// Default staging root when a context does not carry one.
  pub staging_root: Option<PathBuf>,
  /// Wall-clock limit for a single shell command.
  pub command_timeout_ms: u64,
  /// Captured stdout/stderr beyond this many bytes is discarded.
  pub max_output_bytes: usize,
  /// Length of command output excerpts written to task logs.
  pub log_excerpt_chars: usize,
  /// Per-attempt HTTP timeout when a task does not set `Timeout`.
  pub http_timeout_ms: u64,
  /// Fixed pause between HTTP retry attempts.
  pub retry_delay_ms: u64,
  /// Write `Manifest_{GUIDOperation}.json` into the staging root.
  pub write_manifest_audit: bool,
  /// Read-only companion state exposed to every run.
  pub node_state: Map<String, Value>,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      staging_root: None,
      command_timeout_ms: 300_000,
      max_output_bytes: 1024 * 1024,
      log_excerpt_chars: 500,
      http_timeout_ms: 30_000,
      retry_delay_ms: 1_000,
      write_manifest_audit: true,
      node_state: Map::new(),
    }
  }
}

impl EngineSettings {
  /// Load settings from a JSON file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
      path: path.display().to_string(),
      source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
      what: format!("settings file {}", path.display()),
      source: e,
    })
  }

  pub fn command_timeout(&self) -> Duration {
    Duration::from_millis(self.command_timeout_ms)
  }

  pub fn http_timeout(&self) -> Duration {
    Duration::from_millis(self.http_timeout_ms)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }
}
