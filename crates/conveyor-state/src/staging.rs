//! Staging directory resolution.

use std::path::{Path, PathBuf};

use crate::context::ExecutionContext;

/// Maps a run to its staging root and validates staging-relative names.
#[derive(Debug, Clone, Default)]
pub struct StagingResolver {
  default_root: Option<PathBuf>,
}

impl StagingResolver {
  /// Create a resolver with an optional configured default root.
  pub fn new(default_root: Option<PathBuf>) -> Self {
    Self { default_root }
  }

  /// The context's override, else the configured default, else
  /// `./staging` relative to the process working directory.
  pub fn resolve_root(&self, ctx: &ExecutionContext) -> PathBuf {
    ctx
      .staging_path
      .clone()
      .or_else(|| self.default_root.clone())
      .unwrap_or_else(fallback_root)
  }

  /// Join a staging-relative name onto `root`.
  ///
  /// Returns `None` when the name is empty, contains `..` anywhere, or is
  /// absolute. The `..` check is a plain substring test applied before any
  /// normalization.
  pub fn resolve_file(root: &Path, name: &str) -> Option<PathBuf> {
    if name.trim().is_empty() || name.contains("..") {
      return None;
    }
    if name.starts_with('/') || name.starts_with('\\') || Path::new(name).is_absolute() {
      return None;
    }
    Some(root.join(name))
  }
}

fn fallback_root() -> PathBuf {
  std::env::current_dir()
    .unwrap_or_else(|_| PathBuf::from("."))
    .join("staging")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_root_precedence() {
    let resolver = StagingResolver::new(Some(PathBuf::from("/configured")));
    let ctx = ExecutionContext::new();
    assert_eq!(resolver.resolve_root(&ctx), PathBuf::from("/configured"));

    let ctx = ExecutionContext::new().with_staging_path("/override");
    assert_eq!(resolver.resolve_root(&ctx), PathBuf::from("/override"));

    let resolver = StagingResolver::default();
    let root = resolver.resolve_root(&ExecutionContext::new());
    assert!(root.ends_with("staging"));
  }

  #[test]
  fn test_resolve_file_joins_relative_names() {
    let root = Path::new("/stage");
    assert_eq!(
      StagingResolver::resolve_file(root, "reports/daily.json"),
      Some(PathBuf::from("/stage/reports/daily.json"))
    );
  }

  #[test]
  fn test_traversal_rejected_for_any_root() {
    for root in ["/stage", "relative/root", "/"] {
      let root = Path::new(root);
      assert!(StagingResolver::resolve_file(root, "../../etc/passwd").is_none());
      assert!(StagingResolver::resolve_file(root, "a/../b").is_none());
      assert!(StagingResolver::resolve_file(root, "..").is_none());
      assert!(StagingResolver::resolve_file(root, "file..name").is_none());
    }
  }

  #[test]
  fn test_empty_and_absolute_names_rejected() {
    let root = Path::new("/stage");
    assert!(StagingResolver::resolve_file(root, "").is_none());
    assert!(StagingResolver::resolve_file(root, "   ").is_none());
    assert!(StagingResolver::resolve_file(root, "/etc/passwd").is_none());
  }

  #[test]
  fn test_resolved_file_stays_under_real_root() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new().with_staging_path(dir.path());
    let root = StagingResolver::default().resolve_root(&ctx);

    let path = StagingResolver::resolve_file(&root, "exports/run.txt").unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "ok").unwrap();

    assert!(path.starts_with(dir.path()));
    assert_eq!(std::fs::read_to_string(dir.path().join("exports/run.txt")).unwrap(), "ok");
    assert!(StagingResolver::resolve_file(&root, "../outside.txt").is_none());
  }
}
