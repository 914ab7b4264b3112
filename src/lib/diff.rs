//! Compares local and remote entries for a given sync direction.

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::mask::Masker;
use crate::model::{DiffEntry, DiffStatus, DiffSummary, Direction, EnvVar};

/// Classifies every key found on either side, sorted by key.
///
/// `added` means present only in the source of truth (local for a push,
/// remote for a pull) and `removed` means present only in the target.
pub fn diff(
  local: &[EnvVar],
  remote: &BTreeMap<String, String>,
  direction: Direction,
  masker: &Masker,
) -> Vec<DiffEntry> {
  let local: BTreeMap<&str, &str> = local.iter().map(|var| (var.key(), var.value())).collect();
  let keys: BTreeSet<&str> = local
    .keys()
    .copied()
    .chain(remote.keys().map(String::as_str))
    .collect();

  keys
    .into_iter()
    .map(|key| {
      let local_value = local.get(key).copied();
      let remote_value = remote.get(key).map(String::as_str);
      let (source, target) = match direction {
        Direction::Push => (local_value, remote_value),
        Direction::Pull => (remote_value, local_value),
      };

      let status = match (source, target) {
        (Some(s), Some(t)) if s == t => DiffStatus::Unchanged,
        (Some(_), Some(_)) => DiffStatus::Changed,
        (Some(_), None) => DiffStatus::Added,
        // at least one side holds every key in the union
        (None, _) => DiffStatus::Removed,
      };

      DiffEntry {
        key: key.to_string(),
        status,
        local_value: local_value.map(str::to_string),
        remote_value: remote_value.map(str::to_string),
        masked: masker.is_sensitive(key),
      }
    })
    .collect()
}

/// A diff plus what the renderers need around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
  pub direction: Direction,
  pub entries: Vec<DiffEntry>,
  pub summary: DiffSummary,
  /// Remote keys skipped because they are not valid identifiers.
  pub rejected: Vec<String>,
}

impl DiffReport {
  pub fn new(direction: Direction, entries: Vec<DiffEntry>, rejected: Vec<String>) -> Self {
    let summary = DiffSummary::from_entries(&entries);

    #[cfg(feature = "tracing")]
    debug!(
      %direction,
      added = summary.added,
      removed = summary.removed,
      changed = summary.changed,
      unchanged = summary.unchanged,
      "Computed diff"
    );

    Self {
      direction,
      entries,
      summary,
      rejected,
    }
  }

  pub fn has_changes(&self) -> bool {
    self.summary.has_changes()
  }

  pub fn entries_with(&self, status: DiffStatus) -> impl Iterator<Item = &DiffEntry> {
    self.entries.iter().filter(move |entry| entry.status == status)
  }
}
