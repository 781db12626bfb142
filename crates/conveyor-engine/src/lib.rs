//! Task and operation execution engine for conveyor.
//!
//! # Architecture
//!
//! ```text
//! Engine
//! ├── execute_operation(definition) -> OperationManifest
//! │   └── tasks run strictly in order against one ExecutionContext
//! ├── execute_task(definition, ctx) -> TaskManifestEntry
//! │   └── onBefore → core → onCompletion/onFailure/onError → onSubsequent
//! ├── launch_task / launch_operation -> LaunchTicket (background)
//! └── manifests() -> ManifestStore
//!
//! core = TaskTypeRegistry[definition.Type].execute(definition, ctx, engine)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use conveyor_engine::Engine;
//!
//! let engine = Engine::new(settings, Arc::new(FsDefinitionStore::new(root)));
//! let manifest = engine.execute_operation_by_id("nightly-export").await?;
//! println!("{}", manifest.summary);
//! ```
//!
//! Entry points only return `Err` for malformed definitions and failed
//! lookups. Everything that goes wrong while running is recorded in the
//! returned manifest.

mod chain;
mod engine;
mod error;
mod expr;
mod launch;
mod manifest_store;
mod orchestrator;
mod output;
mod params;
mod registry;
mod result;
mod template;
pub mod types;

pub use chain::ChainPhase;
pub use engine::Engine;
pub use error::{EngineError, ExprError, TaskError};
pub use expr::{Evaluation, Program, evaluate};
pub use launch::LaunchTicket;
pub use manifest_store::ManifestStore;
pub use registry::{TaskType, TaskTypeRegistry};
pub use result::{OperationManifest, OperationStatus, TaskManifestEntry, TaskOutcome, TaskStatus};
pub use template::{Expansion, expand, expand_with};
