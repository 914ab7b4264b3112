//! Error taxonomy for the synchronization engine.

use std::fmt;
use std::path::PathBuf;

use crate::model::WriteReport;

/// Why a key failed the `^[A-Za-z_][A-Za-z0-9_]*$` identifier pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
  #[error("key is empty")]
  Empty,
  #[error("key must start with a letter or underscore, found {0:?}")]
  InvalidStart(char),
  #[error("key contains invalid character {0:?}")]
  InvalidChar(char),
}

/// A malformed line in the local env file. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line_number}: {reason}")]
pub struct ParseError {
  pub line_number: usize,
  pub reason: String,
}

impl ParseError {
  pub(crate) fn new(line_number: usize, reason: impl Into<String>) -> Self {
    Self {
      line_number,
      reason: reason.into(),
    }
  }
}

/// The remote operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOp {
  Read,
  Write,
  Delete,
}

impl fmt::Display for BackendOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BackendOp::Read => write!(f, "read"),
      BackendOp::Write => write!(f, "write"),
      BackendOp::Delete => write!(f, "delete"),
    }
  }
}

/// A failed remote call.
///
/// `partial` lists the keys that were already written or deleted before the
/// failure. Nothing is rolled back; re-running the same operation is safe
/// because writes are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("backend {op} failed{}: {cause}{}", key_suffix(.key), partial_suffix(.partial))]
pub struct BackendError {
  pub op: BackendOp,
  pub key: Option<String>,
  pub cause: String,
  pub partial: WriteReport,
}

impl BackendError {
  pub fn new(op: BackendOp, cause: impl Into<String>) -> Self {
    Self {
      op,
      key: None,
      cause: cause.into(),
      partial: WriteReport::default(),
    }
  }

  pub fn with_key(mut self, key: impl Into<String>) -> Self {
    self.key = Some(key.into());
    self
  }

  pub fn with_partial(mut self, partial: WriteReport) -> Self {
    self.partial = partial;
    self
  }
}

fn key_suffix(key: &Option<String>) -> String {
  key
    .as_ref()
    .map(|key| format!(" for key '{}'", key))
    .unwrap_or_default()
}

fn partial_suffix(partial: &WriteReport) -> String {
  if partial.is_empty() {
    return String::new();
  }
  format!(
    " (already applied: {} written, {} deleted)",
    partial.written.len(),
    partial.deleted.len()
  )
}

/// Errors surfaced by the synchronization engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The local env file is malformed; nothing was written.
  #[error("Env file parse error: {0}")]
  Parse(#[from] ParseError),
  /// A locally supplied key does not match the identifier pattern.
  #[error("Invalid key '{key}': {source}")]
  InvalidKey { key: String, source: KeyError },
  /// A key read from the remote store does not match the identifier pattern.
  #[error("Invalid remote key '{key}': {source}")]
  InvalidRemoteKey { key: String, source: KeyError },
  /// The configuration is internally inconsistent.
  #[error("Config mismatch: {0}")]
  ConfigMismatch(String),
  /// The configuration file could not be read or decoded.
  #[error("Config file {path}: {message}")]
  Config { path: PathBuf, message: String },
  /// The serialized blob exceeds the local ceiling; no network call was made.
  #[error("Payload too large: {size} bytes exceeds the {limit} byte limit")]
  PayloadTooLarge { size: usize, limit: usize },
  #[error(transparent)]
  Backend(#[from] BackendError),
  /// A key appears in both writes and deletes, or deletes exist without prune.
  #[error("Conflicting plan for key '{key}'")]
  ConflictingPlan { key: String },
  /// The plan deletes keys and neither an acknowledgement nor force was given.
  #[error("Refusing to delete {} key(s) without confirmation", .deletes.len())]
  ConfirmationRequired { deletes: Vec<String> },
  #[error("Env file not found: {0}")]
  EnvFileNotFound(PathBuf),
  #[error("Env file IO error on {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

impl SyncError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    SyncError::Io {
      path: path.into(),
      source,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backend_error_display() {
    let err = BackendError::new(BackendOp::Write, "throttled").with_key("DB_HOST");
    assert_eq!(err.to_string(), "backend write failed for key 'DB_HOST': throttled");

    let mut partial = WriteReport::default();
    partial.written.insert("A".to_string());
    let err = BackendError::new(BackendOp::Delete, "denied").with_partial(partial);
    assert_eq!(
      err.to_string(),
      "backend delete failed: denied (already applied: 1 written, 0 deleted)"
    );
  }

  #[test]
  fn test_backend_error_converts_into_sync_error() {
    let err = BackendError::new(BackendOp::Read, "timed out");
    let source: &dyn std::error::Error = &err;
    assert!(source.source().is_none());

    let wrapped = SyncError::from(err.clone());
    assert_eq!(wrapped.to_string(), "backend read failed: timed out");
    assert!(matches!(wrapped, SyncError::Backend(inner) if inner == err));
  }

  #[test]
  fn test_parse_error_display() {
    let err = ParseError::new(3, "missing '='");
    assert_eq!(err.to_string(), "line 3: missing '='");
  }
}
