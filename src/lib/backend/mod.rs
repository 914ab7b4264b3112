//! Remote stores.
//!
//! A [`Backend`] exposes `read`, `write`, `delete` and `write_all` over one of
//! two layouts: a single JSON blob ([`BlobBackend`]) or one entry per key under
//! a shared path ([`PathPrefixedBackend`]). Both talk to the network through a
//! small client trait so the engine can be driven by the in-memory clients in
//! [`memory`] as well as the AWS ones.
//!
//! # `write_all` ordering
//!
//! The prune set is computed from a read taken *before* any write:
//! `stale = keys(read()) - keys(data)`, then `write(data)`, then
//! `delete(stale)`. A key added by another actor while the write is in flight
//! is therefore never pruned. Concurrent writers to the same store remain out
//! of scope; no distributed lock is taken.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

use crate::error::{KeyError, SyncError};
use crate::model::{WriteReport, validate_key};

#[cfg(feature = "aws")]
pub mod aws;
mod blob;
pub mod memory;
mod path;

pub use blob::{BlobBackend, MAX_PAYLOAD_BYTES, SecretBlobClient};
pub use path::{DELETE_BATCH_SIZE, ParameterClient, PathPrefixedBackend};

/// Failure reported by a network client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ClientError {
  pub message: String,
}

impl ClientError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// What to do with remote keys that fail the identifier pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPolicy {
  /// Skip them and list them in [`BackendSnapshot::rejected`].
  #[default]
  Lenient,
  /// Fail the read with `InvalidRemoteKey`.
  Strict,
}

/// A remote key that was left out of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedKey {
  pub key: String,
  pub reason: KeyError,
}

/// A fresh, validated read of the remote store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendSnapshot {
  entries: BTreeMap<String, String>,
  rejected: Vec<RejectedKey>,
}

impl BackendSnapshot {
  /// Validates raw remote pairs into a snapshot according to `policy`.
  pub fn from_raw<I>(raw: I, policy: KeyPolicy) -> Result<Self, SyncError>
  where
    I: IntoIterator<Item = (String, String)>,
  {
    let mut snapshot = Self::default();
    for (key, value) in raw {
      match validate_key(&key) {
        Ok(()) => {
          snapshot.entries.insert(key, value);
        }
        Err(source) if policy == KeyPolicy::Strict => {
          return Err(SyncError::InvalidRemoteKey { key, source });
        }
        Err(reason) => {
          #[cfg(feature = "tracing")]
          warn!(key = %key.escape_debug(), %reason, "Skipping invalid remote key");

          snapshot.rejected.push(RejectedKey { key, reason });
        }
      }
    }
    Ok(snapshot)
  }

  pub fn entries(&self) -> &BTreeMap<String, String> {
    &self.entries
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.entries.get(key).map(String::as_str)
  }

  pub fn keys(&self) -> impl Iterator<Item = &String> {
    self.entries.keys()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn rejected(&self) -> &[RejectedKey] {
    &self.rejected
  }
}

/// Fails with `InvalidKey` before any remote call if a key is malformed.
pub(crate) fn validate_keys<'a, I>(keys: I) -> Result<(), SyncError>
where
  I: IntoIterator<Item = &'a String>,
{
  for key in keys {
    validate_key(key).map_err(|source| SyncError::InvalidKey {
      key: key.clone(),
      source,
    })?;
  }
  Ok(())
}

#[async_trait]
pub trait Backend: Send + Sync {
  /// Human-readable location, e.g. `secrets_manager:myapp/prod`.
  fn describe(&self) -> String;

  /// Reads every entry. Never cached.
  async fn read(&self) -> Result<BackendSnapshot, SyncError>;

  /// Upserts `data`. Keys not in `data` are left untouched.
  async fn write(&self, data: &BTreeMap<String, String>) -> Result<(), SyncError>;

  /// Removes `keys`. Absent keys are ignored.
  async fn delete(&self, keys: &BTreeSet<String>) -> Result<(), SyncError>;

  /// Makes `data` authoritative, removing every other key when `prune` is set.
  ///
  /// Upserts the pre-read already satisfies are skipped. On failure the
  /// returned `BackendError` lists what was already applied.
  async fn write_all(
    &self,
    data: &BTreeMap<String, String>,
    prune: bool,
  ) -> Result<WriteReport, SyncError> {
    validate_keys(data.keys())?;

    let current = self.read().await?;
    let stale = stale_keys(&current, data, prune);
    let pending = pending_writes(&current, data);

    #[cfg(feature = "tracing")]
    debug!(
      backend = %self.describe(),
      pending = pending.len(),
      stale = stale.len(),
      "Applying write_all"
    );

    let mut report = WriteReport::default();
    if !pending.is_empty() {
      self.write(&pending).await?;
      report.written = pending.into_keys().collect();
    }
    if !stale.is_empty() {
      self
        .delete(&stale)
        .await
        .map_err(|err| with_written(err, &report.written))?;
      report.deleted = stale;
    }

    #[cfg(feature = "tracing")]
    info!(
      written = report.written.len(),
      deleted = report.deleted.len(),
      "Remote updated"
    );

    Ok(report)
  }
}

/// Keys present in the pre-write read but absent from `data`.
pub(crate) fn stale_keys(
  current: &BackendSnapshot,
  data: &BTreeMap<String, String>,
  prune: bool,
) -> BTreeSet<String> {
  if !prune {
    return BTreeSet::new();
  }
  current
    .keys()
    .filter(|key| !data.contains_key(*key))
    .cloned()
    .collect()
}

/// Entries of `data` whose remote value differs or is missing.
pub(crate) fn pending_writes(
  current: &BackendSnapshot,
  data: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
  data
    .iter()
    .filter(|(key, value)| current.get(key) != Some(value.as_str()))
    .map(|(key, value)| (key.clone(), value.clone()))
    .collect()
}

fn with_written(err: SyncError, written: &BTreeSet<String>) -> SyncError {
  match err {
    SyncError::Backend(mut backend) => {
      backend.partial.written.extend(written.iter().cloned());
      SyncError::Backend(backend)
    }
    other => other,
  }
}

/// Builds the backend described by `config`, talking to AWS.
#[cfg(feature = "aws")]
pub async fn from_config(
  config: &crate::config::Config,
  policy: KeyPolicy,
) -> Result<Box<dyn Backend>, SyncError> {
  use crate::config::BackendTarget;

  let target = config.validate()?;
  let sdk = aws::load_sdk_config(config).await;

  let backend: Box<dyn Backend> = match target {
    BackendTarget::Blob { secret_name } => Box::new(BlobBackend::new(
      aws::SecretsManagerClient::new(&sdk),
      secret_name,
      policy,
    )),
    BackendTarget::PathPrefixed { prefix } => Box::new(PathPrefixedBackend::new(
      aws::SsmClient::new(&sdk),
      prefix,
      policy,
    )),
  };
  Ok(backend)
}

#[cfg(test)]
mod tests {
  use super::memory::MemoryParameterClient;
  use super::*;
  use crate::error::BackendOp;

  fn raw(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    raw(pairs).into_iter().collect()
  }

  #[test]
  fn test_snapshot_lenient_skips_invalid_keys() {
    let snapshot = BackendSnapshot::from_raw(
      raw(&[("GOOD", "1"), ("123BAD", "2"), ("", "3")]),
      KeyPolicy::Lenient,
    )
    .unwrap();
    assert_eq!(snapshot.entries(), &map(&[("GOOD", "1")]));
    let rejected: Vec<_> = snapshot.rejected().iter().map(|r| r.key.as_str()).collect();
    assert_eq!(rejected, vec!["123BAD", ""]);
  }

  #[test]
  fn test_snapshot_strict_fails() {
    let result = BackendSnapshot::from_raw(raw(&[("123BAD", "2")]), KeyPolicy::Strict);
    assert!(matches!(result, Err(SyncError::InvalidRemoteKey { key, .. }) if key == "123BAD"));
  }

  #[test]
  fn test_stale_and_pending() {
    let current = BackendSnapshot::from_raw(raw(&[("A", "1"), ("B", "2")]), KeyPolicy::Lenient)
      .unwrap();
    let data = map(&[("A", "1"), ("C", "3")]);

    assert!(stale_keys(&current, &data, false).is_empty());
    assert_eq!(
      stale_keys(&current, &data, true),
      BTreeSet::from(["B".to_string()])
    );
    assert_eq!(pending_writes(&current, &data), map(&[("C", "3")]));
  }

  /// A client that lets another actor add a parameter while our write runs.
  struct RacingClient {
    inner: MemoryParameterClient,
    intruder: (String, String),
  }

  #[async_trait]
  impl ParameterClient for RacingClient {
    async fn list(&self, path: &str) -> Result<Vec<(String, String)>, ClientError> {
      self.inner.list(path).await
    }

    async fn put(&self, name: &str, value: &str) -> Result<(), ClientError> {
      self.inner.put(&self.intruder.0, &self.intruder.1).await?;
      self.inner.put(name, value).await
    }

    async fn delete(&self, names: &[String]) -> Result<(), ClientError> {
      self.inner.delete(names).await
    }
  }

  #[tokio::test]
  async fn test_prune_ignores_keys_added_during_write() {
    let client = RacingClient {
      inner: MemoryParameterClient::with_parameters([
        ("/app/A", "old"),
        ("/app/STALE", "x"),
      ]),
      intruder: ("/app/CONCURRENT".to_string(), "theirs".to_string()),
    };
    let backend = PathPrefixedBackend::new(client, "/app", KeyPolicy::Lenient);

    let report = backend.write_all(&map(&[("A", "new")]), true).await.unwrap();

    assert_eq!(report.deleted, BTreeSet::from(["STALE".to_string()]));
    let remote = backend.read().await.unwrap();
    assert_eq!(
      remote.entries(),
      &map(&[("A", "new"), ("CONCURRENT", "theirs")])
    );
  }

  #[tokio::test]
  async fn test_write_all_rejects_invalid_key_before_any_call() {
    let backend = PathPrefixedBackend::new(
      MemoryParameterClient::with_parameters([("/app/A", "1")]),
      "/app/",
      KeyPolicy::Lenient,
    );
    let result = backend
      .write_all(&map(&[("B", "2"), ("BAD-KEY", "3")]), false)
      .await;
    assert!(matches!(result, Err(SyncError::InvalidKey { .. })));
    assert_eq!(backend.read().await.unwrap().entries(), &map(&[("A", "1")]));
  }

  #[tokio::test]
  async fn test_delete_failure_reports_written_keys() {
    let client = MemoryParameterClient::with_parameters([("/app/OLD", "1")]);
    client.fail_deletes(true);
    let backend = PathPrefixedBackend::new(client, "/app/", KeyPolicy::Lenient);

    let err = backend
      .write_all(&map(&[("NEW", "1")]), true)
      .await
      .unwrap_err();

    match err {
      SyncError::Backend(err) => {
        assert_eq!(err.op, BackendOp::Delete);
        assert_eq!(err.partial.written, BTreeSet::from(["NEW".to_string()]));
        assert!(err.partial.deleted.is_empty());
      }
      other => panic!("Expected backend error, got {:?}", other),
    }
  }
}
