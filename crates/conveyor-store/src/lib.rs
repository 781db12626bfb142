//! Conveyor Store
//!
//! Lookup of task and operation definitions by GUID. The engine only ever
//! reads through the [`DefinitionStore`] trait; how definitions are
//! created and edited is up to the caller.

mod error;
mod fs_store;
mod memory;

pub use error::StoreError;
pub use fs_store::FsDefinitionStore;
pub use memory::InMemoryDefinitionStore;

use async_trait::async_trait;
use conveyor_config::{OperationDefinition, TaskDefinition};

/// Read access to stored definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
  /// Get a task definition by GUID.
  async fn get_task(&self, guid: &str) -> Result<TaskDefinition, StoreError>;

  /// Get an operation definition by GUID.
  async fn get_operation(&self, guid: &str) -> Result<OperationDefinition, StoreError>;
}
