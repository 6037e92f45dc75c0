//! Pre-ingest accept/reject checks. Cheap, synchronous, and cacheable by
//! content hash so the chunk stage never re-runs them for unchanged files.

use rag_extract::Router;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Warning,
  Critical,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
  pub is_valid: bool,
  pub severity: Option<Severity>,
  pub reason: Option<String>,
  pub validation_check: Option<String>,
}

impl ValidationResult {
  pub fn ok() -> Self {
    Self { is_valid: true, severity: None, reason: None, validation_check: None }
  }

  fn reject(check: &str, severity: Severity, reason: impl Into<String>) -> Self {
    Self { is_valid: false, severity: Some(severity), reason: Some(reason.into()), validation_check: Some(check.to_string()) }
  }
}

/// Runs a fixed chain of checks against a file before it is allowed into the
/// pipeline. Each check can short-circuit the chain with a rejection.
pub struct Validator {
  router: Arc<Router>,
  max_file_size: u64,
}

impl Validator {
  pub fn new(router: Arc<Router>, max_file_size: u64) -> Self {
    Self { router, max_file_size }
  }

  pub fn validate(&self, path: &Path) -> ValidationResult {
    if let Some(result) = self.check_existence(path) {
      return result;
    }
    if let Some(result) = self.check_size(path) {
      return result;
    }
    if let Some(result) = self.check_extension(path) {
      return result;
    }
    ValidationResult::ok()
  }

  fn check_existence(&self, path: &Path) -> Option<ValidationResult> {
    match std::fs::metadata(path) {
      Ok(meta) if meta.len() == 0 => Some(ValidationResult::reject("file_existence", Severity::Critical, "file is empty")),
      Ok(_) => None,
      Err(e) => Some(ValidationResult::reject("file_existence", Severity::Critical, format!("file not accessible: {e}"))),
    }
  }

  fn check_size(&self, path: &Path) -> Option<ValidationResult> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size > self.max_file_size {
      return Some(ValidationResult::reject(
        "file_size",
        Severity::Critical,
        format!("{size} bytes exceeds the {} byte limit", self.max_file_size),
      ));
    }
    None
  }

  fn check_extension(&self, path: &Path) -> Option<ValidationResult> {
    if !self.router.is_indexable(path) {
      let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("<none>").to_string();
      return Some(ValidationResult::reject("extension", Severity::Warning, format!("unsupported extension: {ext}")));
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn validator() -> Validator {
    Validator::new(Arc::new(Router::default()), 1_000_000)
  }

  #[test]
  fn accepts_a_supported_nonempty_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.md");
    std::fs::write(&path, "content").unwrap();

    let result = validator().validate(&path);
    assert!(result.is_valid);
  }

  #[test]
  fn rejects_missing_file() {
    let result = validator().validate(Path::new("/nonexistent/a.md"));
    assert!(!result.is_valid);
    assert_eq!(result.validation_check.as_deref(), Some("file_existence"));
    assert_eq!(result.severity, Some(Severity::Critical));
  }

  #[test]
  fn rejects_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.md");
    std::fs::write(&path, "").unwrap();

    let result = validator().validate(&path);
    assert!(!result.is_valid);
    assert_eq!(result.validation_check.as_deref(), Some("file_existence"));
  }

  #[test]
  fn rejects_oversized_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("big.md");
    std::fs::write(&path, "x").unwrap();

    let tiny_limit = Validator::new(Arc::new(Router::default()), 0);
    let result = tiny_limit.validate(&path);
    assert!(!result.is_valid);
    assert_eq!(result.validation_check.as_deref(), Some("file_size"));
  }

  #[test]
  fn rejects_unsupported_extension_as_warning() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.png");
    std::fs::write(&path, b"\x89PNG").unwrap();

    let result = validator().validate(&path);
    assert!(!result.is_valid);
    assert_eq!(result.severity, Some(Severity::Warning));
  }
}
