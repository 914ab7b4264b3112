//! Value types shared by the codec, the backends, the differ and the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::{KeyError, SyncError};

/// Checks `key` against `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
  let mut chars = key.chars();
  match chars.next() {
    None => return Err(KeyError::Empty),
    Some(c) if !(c.is_ascii_alphabetic() || c == '_') => return Err(KeyError::InvalidStart(c)),
    Some(_) => {}
  }
  match chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
    Some(c) => Err(KeyError::InvalidChar(c)),
    None => Ok(()),
  }
}

/// A single validated key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
  key: String,
  value: String,
  line_comment: Option<String>,
}

impl EnvVar {
  pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, SyncError> {
    let key = key.into();
    validate_key(&key).map_err(|source| SyncError::InvalidKey {
      key: key.clone(),
      source,
    })?;
    Ok(Self {
      key,
      value: value.into(),
      line_comment: None,
    })
  }

  pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
    self.line_comment = Some(comment.into());
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn value(&self) -> &str {
    &self.value
  }

  pub fn line_comment(&self) -> Option<&str> {
    self.line_comment.as_deref()
  }
}

/// Which side is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  /// local → remote
  Push,
  /// remote → local
  Pull,
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Direction::Push => write!(f, "push"),
      Direction::Pull => write!(f, "pull"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
  /// Only in the source of truth.
  Added,
  /// Only in the target.
  Removed,
  Changed,
  Unchanged,
}

impl DiffStatus {
  pub fn symbol(self) -> char {
    match self {
      DiffStatus::Added => '+',
      DiffStatus::Removed => '-',
      DiffStatus::Changed => '~',
      DiffStatus::Unchanged => '=',
    }
  }
}

impl fmt::Display for DiffStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DiffStatus::Added => write!(f, "added"),
      DiffStatus::Removed => write!(f, "removed"),
      DiffStatus::Changed => write!(f, "changed"),
      DiffStatus::Unchanged => write!(f, "unchanged"),
    }
  }
}

/// One row of a diff. Values are kept unmasked; `masked` only tells the
/// renderer to redact them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
  pub key: String,
  pub status: DiffStatus,
  pub local_value: Option<String>,
  pub remote_value: Option<String>,
  pub masked: bool,
}

impl DiffEntry {
  /// The value held by the source of truth for `direction`.
  pub fn source_value(&self, direction: Direction) -> Option<&str> {
    match direction {
      Direction::Push => self.local_value.as_deref(),
      Direction::Pull => self.remote_value.as_deref(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
  pub added: usize,
  pub removed: usize,
  pub changed: usize,
  pub unchanged: usize,
}

impl DiffSummary {
  pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a DiffEntry>) -> Self {
    entries
      .into_iter()
      .fold(Self::default(), |mut summary, entry| {
        match entry.status {
          DiffStatus::Added => summary.added += 1,
          DiffStatus::Removed => summary.removed += 1,
          DiffStatus::Changed => summary.changed += 1,
          DiffStatus::Unchanged => summary.unchanged += 1,
        }
        summary
      })
  }

  pub fn has_changes(&self) -> bool {
    self.added + self.removed + self.changed > 0
  }
}

/// Keys a backend actually wrote and deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
  pub written: BTreeSet<String>,
  pub deleted: BTreeSet<String>,
}

impl WriteReport {
  pub fn is_empty(&self) -> bool {
    self.written.is_empty() && self.deleted.is_empty()
  }
}

/// The writes and deletes derived from a diff, not yet applied.
///
/// `writes` and `deletes` are disjoint, and `deletes` is empty unless prune
/// was requested. `unchanged` holds the entries both sides already agree on so
/// that a pruning push can hand the backend the complete desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
  direction: Direction,
  writes: BTreeMap<String, String>,
  deletes: BTreeSet<String>,
  unchanged: BTreeMap<String, String>,
  prune: bool,
  dry_run: bool,
}

impl SyncPlan {
  pub fn new(
    direction: Direction,
    writes: BTreeMap<String, String>,
    deletes: BTreeSet<String>,
    prune: bool,
    dry_run: bool,
  ) -> Result<Self, SyncError> {
    if let Some(key) = deletes.iter().find(|key| writes.contains_key(*key)) {
      return Err(SyncError::ConflictingPlan { key: key.clone() });
    }
    if !prune && let Some(key) = deletes.first() {
      return Err(SyncError::ConflictingPlan { key: key.clone() });
    }

    Ok(Self {
      direction,
      writes,
      deletes,
      unchanged: BTreeMap::new(),
      prune,
      dry_run,
    })
  }

  pub(crate) fn with_unchanged(mut self, unchanged: BTreeMap<String, String>) -> Self {
    self.unchanged = unchanged;
    self
  }

  pub fn direction(&self) -> Direction {
    self.direction
  }

  pub fn writes(&self) -> &BTreeMap<String, String> {
    &self.writes
  }

  pub fn deletes(&self) -> &BTreeSet<String> {
    &self.deletes
  }

  pub fn prune(&self) -> bool {
    self.prune
  }

  pub fn dry_run(&self) -> bool {
    self.dry_run
  }

  pub fn is_empty(&self) -> bool {
    self.writes.is_empty() && self.deletes.is_empty()
  }

  /// Writes plus unchanged entries: the full state the target should end up with.
  pub fn desired_state(&self) -> BTreeMap<String, String> {
    let mut desired = self.unchanged.clone();
    desired.extend(self.writes.iter().map(|(k, v)| (k.clone(), v.clone())));
    desired
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_validate_key() {
    assert!(validate_key("DB_HOST").is_ok());
    assert!(validate_key("_private").is_ok());
    assert!(validate_key("a1").is_ok());
    assert_eq!(validate_key(""), Err(KeyError::Empty));
    assert_eq!(validate_key("123BAD"), Err(KeyError::InvalidStart('1')));
    assert_eq!(validate_key("BAD-KEY"), Err(KeyError::InvalidChar('-')));
    assert_eq!(validate_key("A\nB"), Err(KeyError::InvalidChar('\n')));
    assert_eq!(validate_key("app/KEY"), Err(KeyError::InvalidChar('/')));
  }

  #[test]
  fn test_env_var_rejects_invalid_key() {
    let var = EnvVar::new("API_URL", "https://example.com").unwrap();
    assert_eq!(var.key(), "API_URL");
    assert_eq!(var.value(), "https://example.com");
    assert!(var.line_comment().is_none());

    match EnvVar::new("9LIVES", "x") {
      Err(SyncError::InvalidKey { key, source }) => {
        assert_eq!(key, "9LIVES");
        assert_eq!(source, KeyError::InvalidStart('9'));
      }
      other => panic!("Expected InvalidKey, got {:?}", other),
    }
  }

  #[test]
  fn test_plan_rejects_overlap() {
    let deletes = BTreeSet::from(["A".to_string()]);
    let result = SyncPlan::new(Direction::Push, map(&[("A", "1")]), deletes, true, false);
    assert!(matches!(result, Err(SyncError::ConflictingPlan { key }) if key == "A"));
  }

  #[test]
  fn test_plan_rejects_deletes_without_prune() {
    let deletes = BTreeSet::from(["B".to_string()]);
    let result = SyncPlan::new(Direction::Pull, map(&[("A", "1")]), deletes, false, false);
    assert!(matches!(result, Err(SyncError::ConflictingPlan { key }) if key == "B"));
  }

  #[test]
  fn test_desired_state_merges_unchanged() {
    let plan = SyncPlan::new(Direction::Push, map(&[("A", "2")]), BTreeSet::new(), false, false)
      .unwrap()
      .with_unchanged(map(&[("B", "1")]));
    assert_eq!(plan.desired_state(), map(&[("A", "2"), ("B", "1")]));
  }

  #[test]
  fn test_summary_counts() {
    let entry = |key: &str, status| DiffEntry {
      key: key.to_string(),
      status,
      local_value: None,
      remote_value: None,
      masked: false,
    };
    let entries = [
      entry("A", DiffStatus::Added),
      entry("B", DiffStatus::Unchanged),
      entry("C", DiffStatus::Removed),
      entry("D", DiffStatus::Unchanged),
    ];
    let summary = DiffSummary::from_entries(&entries);
    assert_eq!(
      summary,
      DiffSummary {
        added: 1,
        removed: 1,
        changed: 0,
        unchanged: 2
      }
    );
    assert!(summary.has_changes());
  }
}
