//! Conveyor Config
//!
//! This crate contains the serializable definition types for conveyor.
//! These types describe tasks and operations before the engine runs them.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI, one file per task or operation)
//! - A durable definition store (as JSON blobs)
//!
//! Type-specific task parameters (`Command`, `URL`, `File`, ...) are kept
//! as a flattened JSON map on [`TaskDefinition`], so the engine's task
//! types can interpret them without this crate knowing every variant.

mod error;
mod operation;
mod settings;
mod task;

pub use error::ConfigError;
pub use operation::OperationDefinition;
pub use settings::EngineSettings;
pub use task::{DEFAULT_DESTINATION, PersistTarget, TaskDefinition};
