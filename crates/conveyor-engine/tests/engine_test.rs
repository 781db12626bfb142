//! End-to-end tests for task execution, chaining, operations and launches.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor_config::{EngineSettings, OperationDefinition, PersistTarget, TaskDefinition};
use async_trait::async_trait;
use conveyor_engine::{ChainPhase, Engine, OperationStatus, TaskOutcome, TaskStatus, TaskType, TaskTypeRegistry};
use conveyor_state::ExecutionContext;
use conveyor_store::InMemoryDefinitionStore;
use serde_json::json;

fn engine_with(staging: &Path, tasks: Vec<TaskDefinition>, operations: Vec<OperationDefinition>) -> Engine {
  let store = InMemoryDefinitionStore::new();
  for task in tasks {
    store.put_task(task);
  }
  for operation in operations {
    store.put_operation(operation);
  }
  let settings = EngineSettings {
    staging_root: Some(staging.to_path_buf()),
    retry_delay_ms: 10,
    ..EngineSettings::default()
  };
  Engine::new(settings, Arc::new(store))
}

fn command(guid: &str, line: &str) -> TaskDefinition {
  TaskDefinition::new(guid, "Command").with_param("Command", line)
}

#[tokio::test]
async fn test_command_output_lands_at_destination() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let entry = engine
    .execute_task(&command("echo", "echo test_output"), &mut ctx)
    .await
    .unwrap();

  assert_eq!(entry.status(), TaskStatus::Complete);
  assert!(entry.success());
  assert_eq!(entry.output, json!("test_output"));
  assert_eq!(ctx.resolve("Output"), Some(&json!("test_output")));
  assert!(entry.stop_time.is_some());
  assert!(entry.subsequent_results().is_empty());
}

#[tokio::test]
async fn test_failed_task_does_not_overwrite_destination() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();
  ctx.set("Output", json!("previous"));

  let entry = engine
    .execute_task(&command("bad", "echo partial; exit 3"), &mut ctx)
    .await
    .unwrap();

  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(!entry.success());
  assert_eq!(ctx.resolve("Output"), Some(&json!("previous")));
  assert!(entry.log().iter().any(|line| line.contains('3')));
}

#[tokio::test]
async fn test_unknown_type_is_unsupported() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let entry = engine
    .execute_task(&TaskDefinition::new("x", "NoSuchType"), &mut ctx)
    .await
    .unwrap();

  assert_eq!(entry.status(), TaskStatus::Unsupported);
  assert!(!entry.success());
}

#[tokio::test]
async fn test_missing_guid_is_structural_error() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let task = TaskDefinition::new("", "Command");
  assert!(engine.execute_task(&task, &mut ctx).await.is_err());
  assert!(engine.execute_operation(&OperationDefinition::default()).await.is_err());
  assert!(engine.execute_operation_by_id("nope").await.is_err());
}

#[tokio::test]
async fn test_conditional_false_without_branch_is_noop() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let task = TaskDefinition::new("cond", "Conditional")
    .with_param("Value", false)
    .with_param("TrueTask", "never");
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert_eq!(entry.status(), TaskStatus::Complete);
  assert!(entry.success());
  assert_eq!(entry.output["Task"], serde_json::Value::Null);
  assert_eq!(entry.output["Branch"], json!("FalseTask"));
}

#[tokio::test]
async fn test_conditional_runs_branch_from_address() {
  let dir = tempfile::tempdir().unwrap();
  let mut yes = command("yes", "echo took-true");
  yes.destination = Some("Branch.Result".to_string());
  let engine = engine_with(dir.path(), vec![yes], vec![]);
  let mut ctx = engine.new_context();
  ctx.set("Flags.Ready", json!("true"));

  let task = TaskDefinition::new("cond", "Conditional")
    .with_param("Address", "Flags.Ready")
    .with_param("TrueTask", "yes");
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert!(entry.success());
  assert_eq!(entry.output["Task"], json!("yes"));
  assert_eq!(ctx.resolve("Branch.Result"), Some(&json!("took-true")));
}

#[tokio::test]
async fn test_chain_phases_on_success() {
  let dir = tempfile::tempdir().unwrap();
  let mut task = command("main", "echo main");
  task.on_before = vec!["before".to_string()];
  task.on_completion = vec!["done".to_string(), "ghost".to_string()];
  task.on_failure = vec!["failed".to_string()];
  task.on_subsequent = vec!["always".to_string()];

  let engine = engine_with(
    dir.path(),
    vec![
      command("before", "echo before"),
      command("done", "echo done"),
      command("failed", "echo failed"),
      command("always", "echo always"),
    ],
    vec![],
  );
  let mut ctx = engine.new_context();
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert!(entry.success());
  assert_eq!(entry.phase(ChainPhase::Before).unwrap().len(), 1);
  assert!(entry.phase(ChainPhase::Failure).is_none());
  assert!(entry.phase(ChainPhase::Error).is_none());
  assert_eq!(entry.phase(ChainPhase::Subsequent).unwrap().len(), 1);

  let completion = entry.phase(ChainPhase::Completion).unwrap();
  assert_eq!(completion.len(), 2);
  assert!(completion[0].success());
  assert_eq!(completion[1].status(), TaskStatus::Error);
  assert_eq!(completion[1].guid_task, "ghost");

  let serialized = serde_json::to_value(&entry).unwrap();
  assert!(serialized["SubsequentResults"].get("onCompletion").is_some());
  assert!(serialized["SubsequentResults"].get("onFailure").is_none());
}

#[tokio::test]
async fn test_failure_and_error_both_fire() {
  let dir = tempfile::tempdir().unwrap();
  let mut task = command("main", "exit 1");
  task.on_completion = vec!["done".to_string()];
  task.on_failure = vec!["failed".to_string()];
  task.on_error = vec!["errored".to_string()];

  let engine = engine_with(
    dir.path(),
    vec![
      command("done", "echo done"),
      command("failed", "echo failed"),
      command("errored", "echo errored"),
    ],
    vec![],
  );
  let mut ctx = engine.new_context();
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(entry.phase(ChainPhase::Completion).is_none());
  assert_eq!(entry.phase(ChainPhase::Failure).unwrap().len(), 1);
  assert_eq!(entry.phase(ChainPhase::Error).unwrap().len(), 1);
  assert!(entry.phase(ChainPhase::Subsequent).is_none());
}

#[tokio::test]
async fn test_failed_before_task_does_not_block_core() {
  let dir = tempfile::tempdir().unwrap();
  let mut task = command("main", "echo main");
  task.on_before = vec!["broken".to_string()];
  let engine = engine_with(dir.path(), vec![command("broken", "exit 2")], vec![]);
  let mut ctx = engine.new_context();

  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert!(entry.success());
  assert!(!entry.phase(ChainPhase::Before).unwrap()[0].success());
  assert!(entry.log().iter().any(|line| line.contains("broken")));
}

#[tokio::test]
async fn test_traversal_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let task = TaskDefinition::new("read", "ReadText").with_param("File", "../../etc/passwd");
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(!entry.success());
}

#[tokio::test]
async fn test_write_persist_and_read_back() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();
  ctx.set("Report", json!({"rows": 3, "region": "eu"}));

  let write = TaskDefinition::new("write", "WriteJSON")
    .with_param("File", "out/{Report.region}/report.json")
    .with_param("Source", "Report");
  let entry = engine.execute_task(&write, &mut ctx).await.unwrap();
  assert!(entry.success(), "{:?}", entry.log());
  assert!(dir.path().join("out/eu/report.json").exists());

  let mut read = TaskDefinition::new("read", "ReadJSON").with_param("File", "out/eu/report.json");
  read.destination = Some("Loaded".to_string());
  read.persist = Some(PersistTarget::Sink {
    address: Some("Copies.Report".to_string()),
    file: Some("copy.json".to_string()),
  });
  let entry = engine.execute_task(&read, &mut ctx).await.unwrap();

  assert!(entry.success(), "{:?}", entry.log());
  assert_eq!(ctx.resolve("Loaded.rows"), Some(&json!(3)));
  assert_eq!(ctx.resolve("Copies.Report.region"), Some(&json!("eu")));
  let copy: serde_json::Value =
    serde_json::from_slice(&std::fs::read(dir.path().join("copy.json")).unwrap()).unwrap();
  assert_eq!(copy, json!({"rows": 3, "region": "eu"}));
}

#[tokio::test]
async fn test_list_and_copy_files() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::create_dir_all(dir.path().join("in/nested")).unwrap();
  std::fs::write(dir.path().join("in/a.csv"), "a").unwrap();
  std::fs::write(dir.path().join("in/b.txt"), "b").unwrap();
  std::fs::write(dir.path().join("in/nested/c.csv"), "c").unwrap();

  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let list = TaskDefinition::new("list", "ListFiles")
    .with_param("Path", "in")
    .with_param("Pattern", "*.csv")
    .with_param("Recursive", true);
  let entry = engine.execute_task(&list, &mut ctx).await.unwrap();
  assert_eq!(entry.output, json!(["a.csv", "nested/c.csv"]));

  let copy = TaskDefinition::new("copy", "CopyFile")
    .with_param("SourceFile", "in/a.csv")
    .with_param("TargetFile", "out/a.csv");
  let entry = engine.execute_task(&copy, &mut ctx).await.unwrap();
  assert!(entry.success());
  assert_eq!(std::fs::read_to_string(dir.path().join("out/a.csv")).unwrap(), "a");

  let copy = copy.with_param("Overwrite", false);
  let entry = engine.execute_task(&copy, &mut ctx).await.unwrap();
  assert!(!entry.success());
}

#[tokio::test]
async fn test_operation_with_missing_task_completes() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);

  let operation = OperationDefinition::new("op", vec!["MISSING".to_string()]);
  let manifest = engine.execute_operation(&operation).await.unwrap();

  assert_eq!(manifest.status(), OperationStatus::Complete);
  assert!(manifest.success());
  assert!(manifest.task_results().is_empty());
  assert!(manifest.log().iter().any(|line| line.contains("MISSING")));
}

#[tokio::test]
async fn test_operation_runs_sequentially_on_shared_state() {
  let dir = tempfile::tempdir().unwrap();
  let mut first = command("first", "echo alpha");
  first.destination = Some("Steps.First".to_string());
  let second = command("second", "echo {Steps.First}-{Region}");

  let mut operation = OperationDefinition::new("op", vec!["first".to_string(), "second".to_string()]);
  operation.global_state = Some(serde_json::from_value(json!({"Region": "eu"})).unwrap());
  let engine = engine_with(dir.path(), vec![first, second], vec![operation]);

  let manifest = engine.execute_operation_by_id("op").await.unwrap();

  assert!(manifest.success());
  assert_eq!(manifest.task_results().len(), 2);
  assert_eq!(manifest.task_results()[1].output, json!("alpha-eu"));
  assert!(manifest.summary.contains("2 of 2"));
  assert!(dir.path().join("Manifest_op.json").exists());

  let stored = engine.manifests().operation(&manifest.guid_run).unwrap();
  assert_eq!(stored.status(), OperationStatus::Complete);
}

#[tokio::test]
async fn test_operation_success_is_and_of_tasks() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(
    dir.path(),
    vec![command("ok", "echo ok"), command("bad", "exit 1"), command("after", "echo after")],
    vec![],
  );

  let operation = OperationDefinition::new(
    "mixed",
    vec!["ok".to_string(), "bad".to_string(), "after".to_string()],
  );
  let manifest = engine.execute_operation(&operation).await.unwrap();

  assert_eq!(manifest.task_results().len(), 3);
  assert!(!manifest.success());
  assert_eq!(manifest.status(), OperationStatus::Error);
  assert!(manifest.task_results()[2].success());
}

#[tokio::test]
async fn test_empty_operation_completes() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);

  let manifest = engine
    .execute_operation(&OperationDefinition::new("empty", vec![]))
    .await
    .unwrap();

  assert_eq!(manifest.status(), OperationStatus::Complete);
  assert!(manifest.success());
}

#[tokio::test]
async fn test_launch_task_returns_before_child_finishes() {
  let dir = tempfile::tempdir().unwrap();
  let mut sleeper = command("sleeper", "sleep 1; echo woke");
  sleeper.destination = Some("Child.Result".to_string());
  let engine = engine_with(dir.path(), vec![sleeper], vec![]);
  let mut ctx = engine.new_context();

  let launch = TaskDefinition::new("launch", "LaunchTask")
    .with_param("TargetTask", "sleeper")
    .with_param("GlobalState", json!({"Seed": 1}));
  let started = Instant::now();
  let entry = engine.execute_task(&launch, &mut ctx).await.unwrap();

  assert!(started.elapsed() < Duration::from_millis(900));
  assert_eq!(entry.status(), TaskStatus::Complete);
  assert!(entry.success());
  assert!(entry.is_async);
  assert_eq!(entry.output["Async"], json!(true));

  let run = entry.output["GUIDRun"].as_str().unwrap().to_string();
  assert_eq!(engine.manifests().task(&run).unwrap().status(), TaskStatus::Running);

  let mut finished = None;
  for _ in 0..50 {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let current = engine.manifests().task(&run).unwrap();
    if current.status() != TaskStatus::Running {
      finished = Some(current);
      break;
    }
  }
  let finished = finished.expect("launched task never finished");
  assert!(finished.success());
  assert_eq!(finished.output, json!("woke"));

  // The child wrote into its own copy of the state.
  assert!(ctx.resolve("Child.Result").is_none());
  assert!(ctx.resolve("Seed").is_none());
}

#[tokio::test]
async fn test_launch_operation_is_tracked() {
  let dir = tempfile::tempdir().unwrap();
  let operation = OperationDefinition::new("background", vec!["step".to_string()]);
  let engine = engine_with(dir.path(), vec![command("step", "echo {Seed}")], vec![operation]);
  let mut ctx = engine.new_context();

  let launch = TaskDefinition::new("launch", "LaunchOperation")
    .with_param("TargetOperation", "background")
    .with_param("GlobalState", json!({"Seed": "seeded"}));
  let entry = engine.execute_task(&launch, &mut ctx).await.unwrap();
  assert!(entry.success());
  let run = entry.output["GUIDRun"].as_str().unwrap().to_string();

  let mut finished = None;
  for _ in 0..50 {
    if let Some(manifest) = engine.manifests().operation(&run)
      && manifest.status() != OperationStatus::Running
    {
      finished = Some(manifest);
      break;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  let finished = finished.expect("launched operation never finished");
  assert!(finished.success());
  assert_eq!(finished.task_results()[0].output, json!("seeded"));
}

#[tokio::test]
async fn test_launch_of_missing_target_fails() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let launch = TaskDefinition::new("launch", "LaunchTask").with_param("TargetTask", "ghost");
  let entry = engine.execute_task(&launch, &mut ctx).await.unwrap();
  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(!entry.is_async);
}

#[tokio::test]
async fn test_paged_operation_generates_and_cleans_up() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();
  ctx.set("Inventory.Total", json!(5));

  let paged = TaskDefinition::new("paged", "GeneratePagedOperation")
    .with_param("RecordCount", "Inventory.Total")
    .with_param("PageSize", 2)
    .with_param(
      "Template",
      json!({"Type": "Command", "Name": "Fetch", "Command": "echo {PageStart}-{PageSize}"}),
    );
  let entry = engine.execute_task(&paged, &mut ctx).await.unwrap();

  assert!(entry.success(), "{:?}", entry.log());
  assert_eq!(entry.output["PageCount"], json!(3));
  assert_eq!(ctx.resolve("Pages"), Some(&json!(["0-2", "2-2", "4-2"])));

  let batch = entry.output["GUIDOperation"].as_str().unwrap();
  assert!(!engine.ephemeral().contains_operation(batch));
  assert!(!engine.ephemeral().contains_task(&format!("{}-page-0", batch)));
  assert!(dir.path().join(format!("PagedOperation_{}.json", batch)).exists());
}

#[tokio::test]
async fn test_paged_operation_cleans_up_after_failure() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let paged = TaskDefinition::new("paged", "GeneratePagedOperation")
    .with_param("RecordCount", 3)
    .with_param("PageSize", 1)
    .with_param("Template", json!({"Type": "Command", "Command": "exit {PageIndex}"}));
  let entry = engine.execute_task(&paged, &mut ctx).await.unwrap();

  assert!(!entry.success());
  assert_eq!(entry.output["Result"]["TaskResults"].as_array().unwrap().len(), 3);
  let batch = entry.output["GUIDOperation"].as_str().unwrap();
  assert!(!engine.ephemeral().contains_operation(batch));
}

#[tokio::test]
async fn test_solver_template_and_collect() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();
  ctx.set("Orders", json!([{"id": 7, "total": 12.5}, {"id": 9, "total": 30}]));

  let mut collect = TaskDefinition::new("ids", "CollectValues")
    .with_param("Source", "Orders")
    .with_param("Field", "id");
  collect.destination = Some("Ids".to_string());
  assert!(engine.execute_task(&collect, &mut ctx).await.unwrap().success());

  let solver = TaskDefinition::new("sum", "Solver")
    .with_param("Expression", "Stats.Sum = Orders[0].total + Orders[1].total; Stats.Count = len(Ids)");
  let entry = engine.execute_task(&solver, &mut ctx).await.unwrap();
  assert!(entry.success(), "{:?}", entry.log());
  assert_eq!(ctx.resolve("Stats.Sum"), Some(&json!(42.5)));

  let template = TaskDefinition::new("msg", "TemplateString")
    .with_param("Template", "{Stats.Count} orders, first {Ids[0]}, owner {Owner}");
  let entry = engine.execute_task(&template, &mut ctx).await.unwrap();
  assert!(entry.success());
  assert_eq!(entry.output, json!("2 orders, first 7, owner {Owner}"));
  assert!(entry.log().iter().any(|line| line.contains("{Owner}")));
}

#[tokio::test]
async fn test_command_each_substitutes_values() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();
  ctx.set("Regions", json!(["eu", "us"]));

  let task = TaskDefinition::new("each", "CommandEach")
    .with_param("Command", "echo {Index}/{Count}:{Value}")
    .with_param("Source", "Regions");
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert!(entry.success(), "{:?}", entry.log());
  assert_eq!(entry.output["Executed"], json!(2));
  assert_eq!(entry.output["Results"][1]["Output"], json!("1/2:us"));
}

#[tokio::test]
async fn test_command_each_stops_on_first_failure() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let task = TaskDefinition::new("each", "CommandEach")
    .with_param("Command", "test {Value} != 2")
    .with_param("Values", json!([1, 2, 3]))
    .with_param("ContinueOnError", false);
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(!entry.success());
  assert_eq!(entry.output["Count"], json!(3));
  assert_eq!(entry.output["Executed"], json!(2));
  assert_eq!(entry.output["Failed"], json!(1));
  assert!(entry.log().iter().any(|line| line.contains("ContinueOnError is false")));
}

#[tokio::test]
async fn test_command_timeout_is_error() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let task = command("slow", "sleep 5").with_param("Timeout", 200);
  let started = Instant::now();
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert!(started.elapsed() < Duration::from_secs(4));
  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(!entry.success());
  assert!(entry.log().iter().any(|line| line.contains("timed out after 200ms")));
  assert!(ctx.resolve("Output").is_none());
}

#[tokio::test]
async fn test_command_output_is_capped_while_reading() {
  let dir = tempfile::tempdir().unwrap();
  let settings = EngineSettings {
    staging_root: Some(dir.path().to_path_buf()),
    max_output_bytes: 16,
    ..EngineSettings::default()
  };
  let engine = Engine::new(settings, Arc::new(InMemoryDefinitionStore::new()));
  let mut ctx = engine.new_context();

  let task = command("loud", "head -c 2000000 /dev/zero | tr '\\0' a");
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert!(entry.success(), "{:?}", entry.log());
  assert_eq!(entry.output, json!("a".repeat(16)));
  assert!(entry.log().iter().any(|line| line == "stdout truncated at 16 bytes"));
}

#[tokio::test]
async fn test_deeply_nested_solver_expression_is_error() {
  let dir = tempfile::tempdir().unwrap();
  let engine = engine_with(dir.path(), vec![], vec![]);
  let mut ctx = engine.new_context();

  let expression = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
  let task = TaskDefinition::new("deep", "Solver").with_param("Expression", expression);
  let entry = engine.execute_task(&task, &mut ctx).await.unwrap();

  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(entry.log().iter().any(|line| line.contains("nested too deeply")), "{:?}", entry.log());
}

#[tokio::test]
async fn test_paged_operation_cannot_page_itself() {
  let dir = tempfile::tempdir().unwrap();
  let paged = TaskDefinition::new("paged", "GeneratePagedOperation")
    .with_param("TemplateTask", "paged")
    .with_param("RecordCount", 4)
    .with_param("PageSize", 1);
  let nested = TaskDefinition::new("nested", "GeneratePagedOperation")
    .with_param("TemplateTask", "paged")
    .with_param("RecordCount", 4)
    .with_param("PageSize", 1);
  let engine = engine_with(dir.path(), vec![paged.clone(), nested.clone()], vec![]);
  let mut ctx = engine.new_context();

  let entry = engine.execute_task(&paged, &mut ctx).await.unwrap();
  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(entry.log().iter().any(|line| line.contains("cannot page itself")), "{:?}", entry.log());

  let entry = engine.execute_task(&nested, &mut ctx).await.unwrap();
  assert_eq!(entry.status(), TaskStatus::Error);
  assert!(ctx.resolve("Pages").is_none());
}

#[tokio::test]
async fn test_unsafe_audit_name_is_logged_in_manifest() {
  let dir = tempfile::tempdir().unwrap();
  let operation = OperationDefinition::new("v1..2", vec!["echo".to_string()]);
  let engine = engine_with(dir.path(), vec![command("echo", "echo hi")], vec![]);

  let manifest = engine.execute_operation(&operation).await.unwrap();

  assert!(manifest.success());
  assert!(manifest.log().iter().any(|line| line.contains("Audit file skipped")), "{:?}", manifest.log());
  assert_eq!(
    engine.manifests().operation(&manifest.guid_run).unwrap().log(),
    manifest.log()
  );
}

struct Explode;

#[async_trait]
impl TaskType for Explode {
  async fn execute(&self, _task: &TaskDefinition, _ctx: &mut ExecutionContext, _engine: &Engine) -> TaskOutcome {
    panic!("boom");
  }
}

#[tokio::test]
async fn test_panicking_launch_is_recorded_as_error() {
  let dir = tempfile::tempdir().unwrap();
  let mut registry = TaskTypeRegistry::builtin();
  registry.register("Explode", Explode);
  let settings = EngineSettings {
    staging_root: Some(dir.path().to_path_buf()),
    ..EngineSettings::default()
  };
  let engine = Engine::with_registry(settings, Arc::new(InMemoryDefinitionStore::new()), registry);

  let ticket = engine.launch_task(TaskDefinition::new("bad", "Explode"), engine.new_context());

  let mut finished = None;
  for _ in 0..50 {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let current = engine.manifests().task(&ticket.guid_run).unwrap();
    if current.status() != TaskStatus::Running {
      finished = Some(current);
      break;
    }
  }
  let finished = finished.expect("panicked launch stayed Running");
  assert_eq!(finished.status(), TaskStatus::Error);
  assert!(!finished.success());
  assert!(engine.manifests().running_tasks().is_empty());
}
