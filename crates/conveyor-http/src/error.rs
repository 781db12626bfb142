use thiserror::Error;

/// Errors that end a session request without a usable response.
///
/// A response with a failing status code is not an error here; the caller
/// decides what a 4xx/5xx means for its task.
#[derive(Debug, Error)]
pub enum SessionError {
  #[error("invalid url '{url}': {message}")]
  InvalidUrl { url: String, message: String },

  #[error("unsupported HTTP method: {method}")]
  InvalidMethod { method: String },

  #[error("invalid header '{name}': {message}")]
  InvalidHeader { name: String, message: String },

  #[error("request timed out after {timeout_ms}ms ({attempts} attempt(s))")]
  Timeout { timeout_ms: u64, attempts: u32 },

  #[error("request failed after {attempts} attempt(s): {source}")]
  Transport {
    attempts: u32,
    #[source]
    source: reqwest::Error,
  },
}

impl SessionError {
  /// Number of attempts made before giving up, if any were made.
  pub fn attempts(&self) -> u32 {
    match self {
      SessionError::Timeout { attempts, .. } | SessionError::Transport { attempts, .. } => *attempts,
      _ => 0,
    }
  }
}
