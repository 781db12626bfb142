//! Engine errors.

use std::path::PathBuf;

use conveyor_config::ConfigError;
use conveyor_http::SessionError;
use conveyor_store::StoreError;

/// Structural errors surfaced to the caller of an entry point.
///
/// Execution-time failures never appear here; they are recorded in the
/// returned manifest instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The definition is malformed (missing GUID and the like).
  #[error("invalid definition: {0}")]
  InvalidDefinition(#[from] ConfigError),

  /// A definition requested by id could not be loaded.
  #[error("definition lookup failed: {0}")]
  Lookup(#[from] StoreError),
}

/// Why a task's core execution failed.
///
/// Converted into an `Error` outcome with the message appended to the
/// task log; never returned from an entry point.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
  #[error("missing required parameter '{name}'")]
  MissingParam { name: String },

  #[error("invalid parameter '{name}': {message}")]
  InvalidParam { name: String, message: String },

  #[error("invalid staging file name '{name}'")]
  UnsafePath { name: String },

  #[error("file not found: {}", path.display())]
  FileNotFound { path: PathBuf },

  #[error("io error on {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("http request failed: {0}")]
  Http(#[from] SessionError),

  #[error("expression error: {0}")]
  Expression(#[from] ExprError),

  #[error("{message}")]
  Failed { message: String },
}

/// Parse and evaluation errors of the `Solver` expression language.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
  #[error("syntax error at {position}: {message}")]
  Syntax { position: usize, message: String },

  #[error("{message}")]
  Eval { message: String },
}

impl ExprError {
  pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
    ExprError::Syntax {
      position,
      message: message.into(),
    }
  }

  pub(crate) fn eval(message: impl Into<String>) -> Self {
    ExprError::Eval {
      message: message.into(),
    }
  }
}

impl TaskError {
  pub(crate) fn missing(name: &str) -> Self {
    TaskError::MissingParam {
      name: name.to_string(),
    }
  }

  pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
    TaskError::InvalidParam {
      name: name.to_string(),
      message: message.into(),
    }
  }

  pub(crate) fn failed(message: impl Into<String>) -> Self {
    TaskError::Failed {
      message: message.into(),
    }
  }

  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    let path = path.into();
    if source.kind() == std::io::ErrorKind::NotFound {
      TaskError::FileNotFound { path }
    } else {
      TaskError::Io { path, source }
    }
  }
}
