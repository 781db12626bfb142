use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use conveyor_config::EngineSettings;
use conveyor_engine::Engine;
use conveyor_state::StateMap;
use conveyor_store::FsDefinitionStore;

/// Conveyor - run stored automation tasks and operations
#[derive(Parser)]
#[command(name = "conveyor")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.conveyor)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine settings file (JSON)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run an operation or a single task
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run a stored operation
  Operation {
    /// The operation's GUID
    guid: String,
  },

  /// Run a single stored task, including its chained tasks
  Task {
    /// The task's GUID
    guid: String,

    /// JSON file with the initial global state
    #[arg(long)]
    state: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".conveyor"),
  };

  match cli.command {
    Some(Commands::Run { target }) => {
      let engine = build_engine(&data_dir, cli.config.as_deref())?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async {
        match target {
          RunTarget::Operation { guid } => run_operation(&engine, &guid).await,
          RunTarget::Task { guid, state } => run_task(&engine, &guid, state.as_deref()).await,
        }
      })?;
    }
    None => {
      println!("conveyor - use --help to see available commands");
    }
  }

  Ok(())
}

fn build_engine(data_dir: &Path, config: Option<&Path>) -> Result<Engine> {
  let mut settings = match config {
    Some(path) => EngineSettings::from_file(path)
      .with_context(|| format!("failed to load settings: {}", path.display()))?,
    None => EngineSettings::default(),
  };
  if settings.staging_root.is_none() {
    settings.staging_root = Some(data_dir.join("staging"));
  }

  let store = FsDefinitionStore::new(data_dir.join("definitions"));
  Ok(Engine::new(settings, Arc::new(store)))
}

async fn run_operation(engine: &Engine, guid: &str) -> Result<()> {
  let manifest = engine
    .execute_operation_by_id(guid)
    .await
    .with_context(|| format!("failed to run operation '{}'", guid))?;

  eprintln!("{}", manifest.summary);
  wait_for_launched(engine).await;
  println!("{}", serde_json::to_string_pretty(&manifest)?);
  Ok(())
}

async fn run_task(engine: &Engine, guid: &str, state: Option<&Path>) -> Result<()> {
  let mut ctx = engine.new_context();
  if let Some(path) = state {
    ctx.merge_global(&read_state(path)?);
  }

  let entry = engine
    .execute_task_by_id(guid, &mut ctx)
    .await
    .with_context(|| format!("failed to run task '{}'", guid))?;

  eprintln!("Task '{}' finished: {:?} (success: {})", guid, entry.status(), entry.success());
  wait_for_launched(engine).await;
  println!("{}", serde_json::to_string_pretty(&entry)?);
  Ok(())
}

fn read_state(path: &Path) -> Result<StateMap> {
  let content =
    std::fs::read_to_string(path).with_context(|| format!("failed to read state file: {}", path.display()))?;
  let value: serde_json::Value = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse state file: {}", path.display()))?;
  match value {
    serde_json::Value::Object(map) => Ok(map),
    _ => bail!("state file {} must contain a JSON object", path.display()),
  }
}

/// Keep the runtime alive until background launches have reported back.
async fn wait_for_launched(engine: &Engine) {
  let mut announced = false;
  while !engine.manifests().running().is_empty() || !engine.manifests().running_tasks().is_empty() {
    if !announced {
      eprintln!("Waiting for launched work to finish...");
      announced = true;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
  }
}
