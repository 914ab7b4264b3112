//! Push and pull between the local env file and a backend.
//!
//! # Sync Logic
//!
//! Every operation reads both sides fresh:
//! 1. Parse the local file (a missing file counts as empty, except for push)
//! 2. Read the backend snapshot
//! 3. Diff them for the requested direction
//! 4. Plan: `added` and `changed` entries become writes; `removed` entries
//!    become deletes only when prune was requested
//! 5. Apply, unless this is a dry run
//!
//! A plan that deletes anything needs an explicit acknowledgement or `force`,
//! whoever the caller is.
//!
//! # Examples
//!
//! ```rust,no_run
//! use secret_sync::backend::{BlobBackend, KeyPolicy, memory::MemorySecretClient};
//! use secret_sync::sync::{SecretSync, SyncOptions};
//!
//! # async fn run() -> Result<(), secret_sync::SyncError> {
//! let backend = BlobBackend::new(MemorySecretClient::default(), "myapp/dev", KeyPolicy::Lenient);
//! let sync = SecretSync::new(&backend, ".env");
//!
//! let outcome = sync.push(&SyncOptions::default()).await?;
//! println!("{} key(s) written", outcome.report.map_or(0, |r| r.written.len()));
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::{debug, info};

use crate::backend::Backend;
use crate::diff::{DiffReport, diff};
use crate::error::SyncError;
use crate::mask::Masker;
use crate::model::{DiffStatus, Direction, EnvVar, SyncPlan, WriteReport};
use crate::parse::{EnvFile, parse};
use crate::persist::{read_env_file, write_env_file};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
  /// Also delete target entries missing from the source of truth.
  pub prune: bool,
  pub dry_run: bool,
  /// The caller acknowledged the plan, deletions included.
  pub confirmed: bool,
  /// Skip the acknowledgement requirement.
  pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
  pub plan: SyncPlan,
  /// `None` for a dry run.
  pub report: Option<WriteReport>,
  /// Remote keys left out because they are not valid identifiers.
  pub rejected: Vec<String>,
}

/// Turns a diff into writes and deletes.
pub fn plan(report: &DiffReport, prune: bool, dry_run: bool) -> Result<SyncPlan, SyncError> {
  let direction = report.direction;
  let mut writes = BTreeMap::new();
  let mut deletes = BTreeSet::new();
  let mut unchanged = BTreeMap::new();

  for entry in &report.entries {
    match (entry.status, entry.source_value(direction)) {
      (DiffStatus::Added | DiffStatus::Changed, Some(value)) => {
        writes.insert(entry.key.clone(), value.to_string());
      }
      (DiffStatus::Unchanged, Some(value)) => {
        unchanged.insert(entry.key.clone(), value.to_string());
      }
      (DiffStatus::Removed, _) if prune => {
        deletes.insert(entry.key.clone());
      }
      _ => {}
    }
  }

  Ok(SyncPlan::new(direction, writes, deletes, prune, dry_run)?.with_unchanged(unchanged))
}

pub struct SecretSync<'a, B: Backend + ?Sized> {
  backend: &'a B,
  env_file: PathBuf,
  masker: Masker,
}

impl<'a, B: Backend + ?Sized> SecretSync<'a, B> {
  pub fn new(backend: &'a B, env_file: impl Into<PathBuf>) -> Self {
    Self {
      backend,
      env_file: env_file.into(),
      masker: Masker::default(),
    }
  }

  pub fn with_masker(mut self, masker: Masker) -> Self {
    self.masker = masker;
    self
  }

  pub fn env_file(&self) -> &Path {
    &self.env_file
  }

  /// Validated local entries in file order, empty when the file does not exist.
  fn read_local(&self) -> Result<Vec<EnvVar>, SyncError> {
    match read_env_file(&self.env_file)? {
      Some(text) => parse(&text)?.env_vars(),
      None => {
        #[cfg(feature = "tracing")]
        debug!(path = ?self.env_file, "Env file does not exist, treating as empty");
        Ok(Vec::new())
      }
    }
  }

  pub async fn diff(&self, direction: Direction) -> Result<DiffReport, SyncError> {
    let local = self.read_local()?;
    let remote = self.backend.read().await?;

    #[cfg(feature = "tracing")]
    debug!(
      backend = %self.backend.describe(),
      local = local.len(),
      remote = remote.len(),
      "Read both sides"
    );

    let entries = diff(&local, remote.entries(), direction, &self.masker);
    let rejected = remote.rejected().iter().map(|r| r.key.clone()).collect();
    Ok(DiffReport::new(direction, entries, rejected))
  }

  /// What a push would change.
  pub async fn status(&self) -> Result<DiffReport, SyncError> {
    self.diff(Direction::Push).await
  }

  /// Diffs for `direction`, failing first if a push has no file to push.
  pub async fn prepare(&self, direction: Direction) -> Result<DiffReport, SyncError> {
    if direction == Direction::Push && !self.env_file.exists() {
      return Err(SyncError::EnvFileNotFound(self.env_file.clone()));
    }
    self.diff(direction).await
  }

  /// Executes `plan`. Returns `None` without touching anything for a dry run.
  ///
  /// Fails with `ConfirmationRequired` when the plan deletes keys and neither
  /// `confirmed` nor `force` is set.
  pub async fn apply(
    &self,
    plan: &SyncPlan,
    confirmed: bool,
    force: bool,
  ) -> Result<Option<WriteReport>, SyncError> {
    if plan.dry_run() {
      #[cfg(feature = "tracing")]
      info!(
        writes = plan.writes().len(),
        deletes = plan.deletes().len(),
        "Dry run, nothing applied"
      );
      return Ok(None);
    }

    if !plan.deletes().is_empty() && !confirmed && !force {
      return Err(SyncError::ConfirmationRequired {
        deletes: plan.deletes().iter().cloned().collect(),
      });
    }

    let report = match plan.direction() {
      Direction::Push => self.apply_remote(plan).await?,
      Direction::Pull => self.apply_local(plan)?,
    };
    Ok(Some(report))
  }

  async fn apply_remote(&self, plan: &SyncPlan) -> Result<WriteReport, SyncError> {
    if plan.is_empty() {
      #[cfg(feature = "tracing")]
      info!("Remote already in sync");
      return Ok(WriteReport::default());
    }

    #[cfg(feature = "tracing")]
    info!(backend = %self.backend.describe(), "Pushing changes");

    self
      .backend
      .write_all(&plan.desired_state(), plan.prune())
      .await
  }

  /// Rewrites the local file from a fresh read so lines outside the plan keep
  /// their layout. The file exists afterwards even when the plan is empty.
  fn apply_local(&self, plan: &SyncPlan) -> Result<WriteReport, SyncError> {
    let text = read_env_file(&self.env_file)?.unwrap_or_default();
    let mut env: EnvFile<'_> = parse(&text)?;
    env.apply(plan.writes(), plan.deletes())?;

    #[cfg(feature = "tracing")]
    info!(
      path = ?self.env_file,
      written = plan.writes().len(),
      deleted = plan.deletes().len(),
      "Writing env file"
    );

    write_env_file(&self.env_file, &env)?;

    Ok(WriteReport {
      written: plan.writes().keys().cloned().collect(),
      deleted: plan.deletes().clone(),
    })
  }

  /// Plans `report` and applies it with `options`.
  pub async fn execute(
    &self,
    report: &DiffReport,
    options: &SyncOptions,
  ) -> Result<SyncOutcome, SyncError> {
    let plan = plan(report, options.prune, options.dry_run)?;
    let applied = self.apply(&plan, options.confirmed, options.force).await?;
    Ok(SyncOutcome {
      plan,
      report: applied,
      rejected: report.rejected.clone(),
    })
  }

  /// Local file → backend. The local file must exist.
  pub async fn push(&self, options: &SyncOptions) -> Result<SyncOutcome, SyncError> {
    #[cfg(feature = "tracing")]
    info!(path = ?self.env_file, "Starting push");

    let report = self.prepare(Direction::Push).await?;
    self.execute(&report, options).await
  }

  /// Backend → local file. Creates the file if needed.
  pub async fn pull(&self, options: &SyncOptions) -> Result<SyncOutcome, SyncError> {
    #[cfg(feature = "tracing")]
    info!(path = ?self.env_file, "Starting pull");

    let report = self.prepare(Direction::Pull).await?;
    self.execute(&report, options).await
  }
}
