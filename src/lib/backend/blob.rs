//! All entries stored as one JSON object in a single secret.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
#[cfg(feature = "tracing")]
use tracing::{debug, info};

use super::{
  Backend, BackendSnapshot, ClientError, KeyPolicy, pending_writes, stale_keys, validate_keys,
};
use crate::error::{BackendError, BackendOp, SyncError};
use crate::model::WriteReport;

/// Local ceiling on the serialized payload. The remote limit is 64 KiB; we
/// stop short of it so oversize pushes fail here with a clear message.
pub const MAX_PAYLOAD_BYTES: usize = 60 * 1024;

/// Network access to a single named secret.
#[async_trait]
pub trait SecretBlobClient: Send + Sync {
  /// Returns `None` when the secret does not exist yet.
  async fn get(&self, name: &str) -> Result<Option<String>, ClientError>;

  /// Stores `payload`, creating the secret if needed.
  async fn put(&self, name: &str, payload: &str) -> Result<(), ClientError>;
}

pub struct BlobBackend<C> {
  client: C,
  secret_name: String,
  policy: KeyPolicy,
  max_payload: usize,
}

impl<C: SecretBlobClient> BlobBackend<C> {
  pub fn new(client: C, secret_name: impl Into<String>, policy: KeyPolicy) -> Self {
    Self {
      client,
      secret_name: secret_name.into(),
      policy,
      max_payload: MAX_PAYLOAD_BYTES,
    }
  }

  pub fn with_max_payload(mut self, max_payload: usize) -> Self {
    self.max_payload = max_payload;
    self
  }

  pub fn client(&self) -> &C {
    &self.client
  }

  /// The whole stored mapping, including keys the snapshot would reject.
  async fn fetch(&self, op: BackendOp) -> Result<BTreeMap<String, String>, SyncError> {
    let payload = self
      .client
      .get(&self.secret_name)
      .await
      .map_err(|err| BackendError::new(op, err.message))?;

    match payload {
      Some(payload) => decode(&self.secret_name, &payload)
        .map_err(|cause| BackendError::new(op, cause).into()),
      None => {
        #[cfg(feature = "tracing")]
        debug!(secret = %self.secret_name, "Secret not found, treating as empty");
        Ok(BTreeMap::new())
      }
    }
  }

  async fn store(&self, data: &BTreeMap<String, String>, op: BackendOp) -> Result<(), SyncError> {
    let payload =
      serde_json::to_string(data).map_err(|err| BackendError::new(op, err.to_string()))?;
    if payload.len() > self.max_payload {
      return Err(SyncError::PayloadTooLarge {
        size: payload.len(),
        limit: self.max_payload,
      });
    }

    self
      .client
      .put(&self.secret_name, &payload)
      .await
      .map_err(|err| BackendError::new(op, err.message))?;

    #[cfg(feature = "tracing")]
    debug!(secret = %self.secret_name, keys = data.len(), "Stored secret");

    Ok(())
  }
}

fn decode(secret_name: &str, payload: &str) -> Result<BTreeMap<String, String>, String> {
  if payload.trim().is_empty() {
    return Ok(BTreeMap::new());
  }

  let value: serde_json::Value = serde_json::from_str(payload)
    .map_err(|err| format!("secret '{}' does not contain valid JSON: {}", secret_name, err))?;

  let serde_json::Value::Object(object) = value else {
    return Err(format!("secret '{}' must be a JSON object", secret_name));
  };

  Ok(
    object
      .into_iter()
      .map(|(key, value)| {
        let value = match value {
          serde_json::Value::String(s) => s,
          other => other.to_string(),
        };
        (key, value)
      })
      .collect(),
  )
}

#[async_trait]
impl<C: SecretBlobClient> Backend for BlobBackend<C> {
  fn describe(&self) -> String {
    format!("secrets_manager:{}", self.secret_name)
  }

  async fn read(&self) -> Result<BackendSnapshot, SyncError> {
    let raw = self.fetch(BackendOp::Read).await?;
    BackendSnapshot::from_raw(raw, self.policy)
  }

  async fn write(&self, data: &BTreeMap<String, String>) -> Result<(), SyncError> {
    validate_keys(data.keys())?;
    if data.is_empty() {
      return Ok(());
    }

    let mut merged = self.fetch(BackendOp::Write).await?;
    merged.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
    self.store(&merged, BackendOp::Write).await
  }

  async fn delete(&self, keys: &BTreeSet<String>) -> Result<(), SyncError> {
    let mut current = self.fetch(BackendOp::Delete).await?;
    let before = current.len();
    current.retain(|key, _| !keys.contains(key));
    if current.len() == before {
      return Ok(());
    }
    self.store(&current, BackendOp::Delete).await
  }

  /// One read, one payload write: merge and prune land together.
  async fn write_all(
    &self,
    data: &BTreeMap<String, String>,
    prune: bool,
  ) -> Result<WriteReport, SyncError> {
    validate_keys(data.keys())?;

    let mut raw = self.fetch(BackendOp::Read).await?;
    let current = BackendSnapshot::from_raw(raw.clone(), self.policy)?;
    let stale = stale_keys(&current, data, prune);
    let pending = pending_writes(&current, data);

    if pending.is_empty() && stale.is_empty() {
      return Ok(WriteReport::default());
    }

    raw.extend(pending.iter().map(|(k, v)| (k.clone(), v.clone())));
    raw.retain(|key, _| !stale.contains(key));
    self.store(&raw, BackendOp::Write).await?;

    #[cfg(feature = "tracing")]
    info!(
      secret = %self.secret_name,
      written = pending.len(),
      deleted = stale.len(),
      "Secret updated"
    );

    Ok(WriteReport {
      written: pending.into_keys().collect(),
      deleted: stale,
    })
  }
}
