//! Integration tests for FsDefinitionStore.

use conveyor_config::{OperationDefinition, TaskDefinition};
use conveyor_store::{DefinitionStore, FsDefinitionStore, StoreError};

#[tokio::test]
async fn test_save_and_load_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let store = FsDefinitionStore::new(dir.path());

  let task = TaskDefinition::new("echo", "Command").with_param("Command", "echo hi");
  store.save_task(&task).await.unwrap();
  let operation = OperationDefinition::new("nightly", vec!["echo".to_string()]);
  store.save_operation(&operation).await.unwrap();

  assert!(dir.path().join("tasks/echo.json").exists());
  assert_eq!(store.get_task("echo").await.unwrap(), task);
  assert_eq!(store.get_operation("nightly").await.unwrap(), operation);
}

#[tokio::test]
async fn test_hand_written_document() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::create_dir_all(dir.path().join("tasks")).unwrap();
  std::fs::write(
    dir.path().join("tasks/pull.json"),
    r#"{"GUIDTask": "pull", "Type": "GetJSON", "URL": "http://example.test/{Region}", "onCompletion": ["notify"]}"#,
  )
  .unwrap();

  let store = FsDefinitionStore::new(dir.path());
  let task = store.get_task("pull").await.unwrap();
  assert_eq!(task.task_type, "GetJSON");
  assert_eq!(task.on_completion, vec!["notify"]);
  assert_eq!(task.param("url").unwrap(), "http://example.test/{Region}");
}

#[tokio::test]
async fn test_missing_is_not_found() {
  let dir = tempfile::tempdir().unwrap();
  let store = FsDefinitionStore::new(dir.path());

  let err = store.get_task("nope").await.unwrap_err();
  assert!(err.is_not_found());
  let err = store.get_operation("nope").await.unwrap_err();
  assert!(matches!(err, StoreError::NotFound { kind: "operation", .. }));
}

#[tokio::test]
async fn test_traversing_guid_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let store = FsDefinitionStore::new(dir.path());

  for guid in ["../secret", "a/b", "", "..\\x"] {
    let err = store.get_task(guid).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidGuid { .. }), "guid {:?}", guid);
  }
}

#[tokio::test]
async fn test_invalid_document_is_parse_error() {
  let dir = tempfile::tempdir().unwrap();
  std::fs::create_dir_all(dir.path().join("operations")).unwrap();
  std::fs::write(dir.path().join("operations/broken.json"), "{not json").unwrap();
  std::fs::write(dir.path().join("operations/noid.json"), r#"{"Tasks": []}"#).unwrap();

  let store = FsDefinitionStore::new(dir.path());
  assert!(matches!(
    store.get_operation("broken").await.unwrap_err(),
    StoreError::Parse { .. }
  ));
  assert!(matches!(
    store.get_operation("noid").await.unwrap_err(),
    StoreError::Parse { .. }
  ));
}
