//! In-process clients with the same semantics as the remote services.
//!
//! Used by the test suites and handy for dry experiments. Failures can be
//! injected to exercise partial-write reporting.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ClientError, DELETE_BATCH_SIZE, ParameterClient, SecretBlobClient};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single secret held in memory.
#[derive(Debug, Default)]
pub struct MemorySecretClient {
  payload: Mutex<Option<String>>,
  puts: AtomicUsize,
  fail_puts: AtomicBool,
}

impl MemorySecretClient {
  /// Starts with an existing secret holding `payload` verbatim.
  pub fn with_payload(payload: &str) -> Self {
    Self {
      payload: Mutex::new(Some(payload.to_string())),
      ..Self::default()
    }
  }

  pub fn payload(&self) -> Option<String> {
    lock(&self.payload).clone()
  }

  /// Successful puts so far.
  pub fn put_count(&self) -> usize {
    self.puts.load(Ordering::SeqCst)
  }

  pub fn fail_puts(&self, fail: bool) {
    self.fail_puts.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl SecretBlobClient for MemorySecretClient {
  async fn get(&self, _name: &str) -> Result<Option<String>, ClientError> {
    Ok(self.payload())
  }

  async fn put(&self, name: &str, payload: &str) -> Result<(), ClientError> {
    if self.fail_puts.load(Ordering::SeqCst) {
      return Err(ClientError::new(format!("injected put failure for '{}'", name)));
    }
    *lock(&self.payload) = Some(payload.to_string());
    self.puts.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// A flat namespace of parameters held in memory.
#[derive(Debug)]
pub struct MemoryParameterClient {
  parameters: Mutex<BTreeMap<String, String>>,
  puts: AtomicUsize,
  put_budget: AtomicUsize,
  delete_calls: AtomicUsize,
  fail_deletes: AtomicBool,
}

impl Default for MemoryParameterClient {
  fn default() -> Self {
    Self {
      parameters: Mutex::default(),
      puts: AtomicUsize::new(0),
      put_budget: AtomicUsize::new(usize::MAX),
      delete_calls: AtomicUsize::new(0),
      fail_deletes: AtomicBool::new(false),
    }
  }
}

impl MemoryParameterClient {
  pub fn with_parameters<I, K, V>(parameters: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let client = Self::default();
    lock(&client.parameters).extend(
      parameters
        .into_iter()
        .map(|(name, value)| (name.into(), value.into())),
    );
    client
  }

  /// Every stored parameter by full name.
  pub fn parameters(&self) -> BTreeMap<String, String> {
    lock(&self.parameters).clone()
  }

  pub fn put_count(&self) -> usize {
    self.puts.load(Ordering::SeqCst)
  }

  pub fn delete_calls(&self) -> usize {
    self.delete_calls.load(Ordering::SeqCst)
  }

  /// Lets `n` more puts succeed, then fails every one after.
  pub fn fail_puts_after(&self, n: usize) {
    self.put_budget.store(n, Ordering::SeqCst);
  }

  pub fn fail_deletes(&self, fail: bool) {
    self.fail_deletes.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl ParameterClient for MemoryParameterClient {
  async fn list(&self, path: &str) -> Result<Vec<(String, String)>, ClientError> {
    let parameters = lock(&self.parameters);
    Ok(
      parameters
        .iter()
        .filter(|(name, _)| {
          name
            .strip_prefix(path)
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect(),
    )
  }

  async fn put(&self, name: &str, value: &str) -> Result<(), ClientError> {
    let budget = self
      .put_budget
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
    if budget.is_err() {
      return Err(ClientError::new(format!("injected put failure for '{}'", name)));
    }

    lock(&self.parameters).insert(name.to_string(), value.to_string());
    self.puts.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn delete(&self, names: &[String]) -> Result<(), ClientError> {
    if names.len() > DELETE_BATCH_SIZE {
      return Err(ClientError::new(format!(
        "at most {} names per delete, got {}",
        DELETE_BATCH_SIZE,
        names.len()
      )));
    }
    self.delete_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_deletes.load(Ordering::SeqCst) {
      return Err(ClientError::new("injected delete failure"));
    }

    let mut parameters = lock(&self.parameters);
    for name in names {
      parameters.remove(name);
    }
    Ok(())
  }
}
