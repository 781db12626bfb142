use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conveyor_config::{OperationDefinition, TaskDefinition};
use tokio::fs;

use crate::DefinitionStore;
use crate::error::StoreError;

/// Definitions stored as JSON documents on disk.
///
/// ```text
/// {root}/
/// ├── tasks/
/// │   └── {GUIDTask}.json
/// └── operations/
///     └── {GUIDOperation}.json
/// ```
#[derive(Debug, Clone)]
pub struct FsDefinitionStore {
  root: PathBuf,
}

impl FsDefinitionStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Write a task document, creating directories as needed.
  pub async fn save_task(&self, task: &TaskDefinition) -> Result<(), StoreError> {
    let path = self.document_path("tasks", "task", &task.guid_task)?;
    write_document(&path, task).await
  }

  /// Write an operation document, creating directories as needed.
  pub async fn save_operation(&self, operation: &OperationDefinition) -> Result<(), StoreError> {
    let path = self.document_path("operations", "operation", &operation.guid_operation)?;
    write_document(&path, operation).await
  }

  /// GUIDs become file names, so anything that could escape the
  /// directory is refused.
  fn document_path(&self, dir: &str, kind: &'static str, guid: &str) -> Result<PathBuf, StoreError> {
    let guid = guid.trim();
    let invalid = guid.is_empty()
      || guid.contains("..")
      || guid.contains('/')
      || guid.contains('\\')
      || guid.contains('\0');
    if invalid {
      return Err(StoreError::InvalidGuid {
        kind,
        guid: guid.to_string(),
      });
    }
    Ok(self.root.join(dir).join(format!("{}.json", guid)))
  }

  async fn read_document(&self, path: &Path, kind: &'static str, guid: &str) -> Result<String, StoreError> {
    match fs::read_to_string(path).await {
      Ok(content) => Ok(content),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
        kind,
        guid: guid.to_string(),
      }),
      Err(e) => Err(StoreError::Io {
        path: path.display().to_string(),
        source: e,
      }),
    }
  }
}

async fn write_document<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
  let io_err = |source| StoreError::Io {
    path: path.display().to_string(),
    source,
  };
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).await.map_err(io_err)?;
  }
  let content = serde_json::to_string_pretty(value).map_err(|e| StoreError::Parse {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;
  fs::write(path, content).await.map_err(io_err)
}

#[async_trait]
impl DefinitionStore for FsDefinitionStore {
  async fn get_task(&self, guid: &str) -> Result<TaskDefinition, StoreError> {
    let path = self.document_path("tasks", "task", guid)?;
    let content = self.read_document(&path, "task", guid).await?;
    TaskDefinition::from_json(&content).map_err(|e| StoreError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })
  }

  async fn get_operation(&self, guid: &str) -> Result<OperationDefinition, StoreError> {
    let path = self.document_path("operations", "operation", guid)?;
    let content = self.read_document(&path, "operation", guid).await?;
    OperationDefinition::from_json(&content).map_err(|e| StoreError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })
  }
}
