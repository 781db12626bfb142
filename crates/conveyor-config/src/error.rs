use thiserror::Error;

/// Errors raised while loading or validating definitions and settings.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// A required identifier or field is absent or empty.
  #[error("missing required field: {field}")]
  MissingField { field: String },

  /// A field is present but unusable.
  #[error("invalid field '{field}': {message}")]
  InvalidField { field: String, message: String },

  /// The document could not be parsed.
  #[error("failed to parse {what}: {source}")]
  Parse {
    what: String,
    #[source]
    source: serde_json::Error,
  },

  /// The document could not be read.
  #[error("failed to read {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

impl ConfigError {
  pub fn missing(field: impl Into<String>) -> Self {
    Self::MissingField {
      field: field.into(),
    }
  }

  pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidField {
      field: field.into(),
      message: message.into(),
    }
  }
}
