//! The engine and its task-level entry points.

use std::path::PathBuf;
use std::sync::Arc;

use conveyor_config::{EngineSettings, OperationDefinition, TaskDefinition};
use conveyor_http::SessionClient;
use conveyor_state::{ExecutionContext, StagingResolver};
use conveyor_store::{DefinitionStore, InMemoryDefinitionStore, StoreError};
use tracing::{info, instrument, warn};

use crate::error::{EngineError, TaskError};
use crate::manifest_store::ManifestStore;
use crate::output::store_result;
use crate::registry::TaskTypeRegistry;
use crate::result::{TaskManifestEntry, TaskOutcome, TaskStatus};

/// Executes tasks and operations.
///
/// Cloning is cheap and every clone shares the same registry, stores and
/// manifest history, which is how launched background work reports back.
#[derive(Clone)]
pub struct Engine {
  inner: Arc<EngineInner>,
}

struct EngineInner {
  settings: EngineSettings,
  store: Arc<dyn DefinitionStore>,
  ephemeral: InMemoryDefinitionStore,
  registry: TaskTypeRegistry,
  session: SessionClient,
  manifests: ManifestStore,
  staging: StagingResolver,
}

impl Engine {
  /// Create an engine with every builtin task type registered.
  pub fn new(settings: EngineSettings, store: Arc<dyn DefinitionStore>) -> Self {
    Self::with_registry(settings, store, TaskTypeRegistry::builtin())
  }

  /// Create an engine with a caller-assembled registry.
  pub fn with_registry(
    settings: EngineSettings,
    store: Arc<dyn DefinitionStore>,
    registry: TaskTypeRegistry,
  ) -> Self {
    let session = SessionClient::new(settings.http_timeout(), settings.retry_delay());
    let staging = StagingResolver::new(settings.staging_root.clone());
    Self {
      inner: Arc::new(EngineInner {
        settings,
        store,
        ephemeral: InMemoryDefinitionStore::new(),
        registry,
        session,
        manifests: ManifestStore::new(),
        staging,
      }),
    }
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.inner.settings
  }

  pub fn manifests(&self) -> &ManifestStore {
    &self.inner.manifests
  }

  pub fn registry(&self) -> &TaskTypeRegistry {
    &self.inner.registry
  }

  pub fn session(&self) -> &SessionClient {
    &self.inner.session
  }

  pub fn staging(&self) -> &StagingResolver {
    &self.inner.staging
  }

  /// Registrations that shadow the durable store for the life of a
  /// generated batch.
  pub fn ephemeral(&self) -> &InMemoryDefinitionStore {
    &self.inner.ephemeral
  }

  /// A fresh context seeded with the configured node state.
  pub fn new_context(&self) -> ExecutionContext {
    ExecutionContext::new().with_node_state(self.inner.settings.node_state.clone())
  }

  /// Ephemeral registrations first, then the durable store.
  pub async fn lookup_task(&self, guid: &str) -> Result<TaskDefinition, StoreError> {
    if let Some(task) = self.inner.ephemeral.lookup_task(guid) {
      return Ok(task);
    }
    self.inner.store.get_task(guid).await
  }

  /// Ephemeral registrations first, then the durable store.
  pub async fn lookup_operation(&self, guid: &str) -> Result<OperationDefinition, StoreError> {
    if let Some(operation) = self.inner.ephemeral.lookup_operation(guid) {
      return Ok(operation);
    }
    self.inner.store.get_operation(guid).await
  }

  /// Execute one task, including its chain phases, against `ctx`.
  ///
  /// Errors only when the definition is malformed; every execution-time
  /// failure is reported in the returned entry.
  #[instrument(
    name = "task_execute",
    skip(self, task, ctx),
    fields(task_id = %task.guid_task, task_type = %task.task_type)
  )]
  pub async fn execute_task(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
  ) -> Result<TaskManifestEntry, EngineError> {
    task.validate()?;
    Ok(self.run_chained(task, ctx).await)
  }

  /// Load a task from the store and execute it.
  pub async fn execute_task_by_id(
    &self,
    guid: &str,
    ctx: &mut ExecutionContext,
  ) -> Result<TaskManifestEntry, EngineError> {
    let task = self.lookup_task(guid).await?;
    self.execute_task(&task, ctx).await
  }

  /// Core dispatch plus result storage, without chain phases.
  pub(crate) async fn run_standalone(
    &self,
    task: &TaskDefinition,
    ctx: &mut ExecutionContext,
  ) -> TaskManifestEntry {
    let mut entry = TaskManifestEntry::start(task);
    info!(task_id = %task.guid_task, task_type = %task.task_type, "task_started");

    let outcome = match self.inner.registry.get(&task.task_type) {
      Some(handler) => handler.execute(task, ctx, self).await,
      None => {
        warn!(task_id = %task.guid_task, task_type = %task.task_type, "task_type_unsupported");
        TaskOutcome::unsupported(&task.task_type)
      }
    };

    let mut log = Vec::new();
    let (status, success) = match store_result(self, task, ctx, &outcome, &mut log).await {
      Ok(()) => (outcome.status, outcome.success),
      Err(e) => {
        log.push(format!("Failed to persist result: {}", e));
        (TaskStatus::Error, false)
      }
    };

    for line in outcome.log {
      entry.push_log(line);
    }
    for line in log {
      entry.push_log(line);
    }
    entry.output = outcome.output;
    entry.is_async = outcome.is_async;
    entry.finish(status, success);

    if success {
      info!(
        task_id = %task.guid_task,
        status = ?status,
        elapsed_ms = entry.elapsed_ms(),
        "task_completed"
      );
    } else {
      warn!(
        task_id = %task.guid_task,
        status = ?status,
        elapsed_ms = entry.elapsed_ms(),
        "task_failed"
      );
    }

    entry
  }

  /// Resolve a staging-relative file name for `ctx`'s run.
  pub(crate) fn staging_file(&self, ctx: &ExecutionContext, name: &str) -> Result<PathBuf, TaskError> {
    let root = self.inner.staging.resolve_root(ctx);
    StagingResolver::resolve_file(&root, name).ok_or_else(|| TaskError::UnsafePath {
      name: name.to_string(),
    })
  }

  /// The staging root for `ctx`'s run.
  pub(crate) fn staging_root(&self, ctx: &ExecutionContext) -> PathBuf {
    self.inner.staging.resolve_root(ctx)
  }
}
