//! One remote entry per key, all under a shared path prefix.
//!
//! With prefix `/myapp/prod/`, `DB_HOST` lives at `/myapp/prod/DB_HOST`.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
#[cfg(feature = "tracing")]
use tracing::{debug, error};

use super::{Backend, BackendSnapshot, ClientError, KeyPolicy, validate_keys};
use crate::config::normalize_prefix;
use crate::error::{BackendError, BackendOp, SyncError};
use crate::model::WriteReport;

/// Most names a single delete request accepts.
pub const DELETE_BATCH_SIZE: usize = 10;

/// Network access to individually addressable parameters.
#[async_trait]
pub trait ParameterClient: Send + Sync {
  /// Every `(full name, value)` directly under `path`, not recursing.
  async fn list(&self, path: &str) -> Result<Vec<(String, String)>, ClientError>;

  /// Creates or overwrites one parameter.
  async fn put(&self, name: &str, value: &str) -> Result<(), ClientError>;

  /// Deletes up to [`DELETE_BATCH_SIZE`] parameters. Missing names are ignored.
  async fn delete(&self, names: &[String]) -> Result<(), ClientError>;
}

pub struct PathPrefixedBackend<C> {
  client: C,
  prefix: String,
  policy: KeyPolicy,
}

impl<C: ParameterClient> PathPrefixedBackend<C> {
  /// `prefix` gets a trailing `/` if it lacks one.
  pub fn new(client: C, prefix: impl AsRef<str>, policy: KeyPolicy) -> Self {
    Self {
      client,
      prefix: normalize_prefix(prefix.as_ref()),
      policy,
    }
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  pub fn client(&self) -> &C {
    &self.client
  }

  fn full_name(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }
}

#[async_trait]
impl<C: ParameterClient> Backend for PathPrefixedBackend<C> {
  fn describe(&self) -> String {
    format!("parameter_store:{}", self.prefix)
  }

  async fn read(&self) -> Result<BackendSnapshot, SyncError> {
    let listed = self
      .client
      .list(&self.prefix)
      .await
      .map_err(|err| BackendError::new(BackendOp::Read, err.message))?;

    #[cfg(feature = "tracing")]
    debug!(prefix = %self.prefix, count = listed.len(), "Listed parameters");

    let stripped = listed.into_iter().map(|(name, value)| {
      let key = match name.strip_prefix(self.prefix.as_str()) {
        Some(key) => key.to_string(),
        None => name,
      };
      (key, value)
    });
    BackendSnapshot::from_raw(stripped, self.policy)
  }

  /// Puts each entry in turn. A failure stops the loop and reports the keys
  /// already written.
  async fn write(&self, data: &BTreeMap<String, String>) -> Result<(), SyncError> {
    validate_keys(data.keys())?;

    let mut written = BTreeSet::new();
    for (key, value) in data {
      let name = self.full_name(key);
      if let Err(err) = self.client.put(&name, value).await {
        #[cfg(feature = "tracing")]
        error!(parameter = %name, "Failed to write parameter");

        return Err(
          BackendError::new(BackendOp::Write, err.message)
            .with_key(key.clone())
            .with_partial(WriteReport {
              written,
              deleted: BTreeSet::new(),
            })
            .into(),
        );
      }

      #[cfg(feature = "tracing")]
      debug!(parameter = %name, "Wrote parameter");

      written.insert(key.clone());
    }
    Ok(())
  }

  async fn delete(&self, keys: &BTreeSet<String>) -> Result<(), SyncError> {
    let keys: Vec<&String> = keys.iter().collect();
    let mut deleted = BTreeSet::new();

    for batch in keys.chunks(DELETE_BATCH_SIZE) {
      let names: Vec<String> = batch.iter().map(|key| self.full_name(key)).collect();
      if let Err(err) = self.client.delete(&names).await {
        #[cfg(feature = "tracing")]
        error!(?names, "Failed to delete parameters");

        let mut failure = BackendError::new(BackendOp::Delete, err.message).with_partial(WriteReport {
          written: BTreeSet::new(),
          deleted,
        });
        if let [key] = batch {
          failure = failure.with_key((*key).clone());
        }
        return Err(failure.into());
      }

      #[cfg(feature = "tracing")]
      debug!(?names, "Deleted parameters");

      deleted.extend(batch.iter().map(|key| (*key).clone()));
    }
    Ok(())
  }
}
