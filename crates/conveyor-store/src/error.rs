use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  /// No definition with this GUID exists.
  #[error("{kind} not found: {guid}")]
  NotFound { kind: &'static str, guid: String },

  /// The GUID cannot be used as a storage key.
  #[error("invalid {kind} id '{guid}'")]
  InvalidGuid { kind: &'static str, guid: String },

  #[error("io error reading {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid definition in {path}: {message}")]
  Parse { path: String, message: String },
}

impl StoreError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, StoreError::NotFound { .. })
  }
}
