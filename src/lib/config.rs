//! Configuration value object.
//!
//! A [`Config`] is built once per invocation (from `.secretsync.toml`, then
//! environment overrides) and passed by reference. Environment variables are
//! read through an explicit lookup function, never from process-wide state
//! inside the engine.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILE: &str = ".secretsync.toml";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PARAMETER_PATH: &str = "/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Region overrides, highest priority first.
const REGION_VARS: &[&str] = &["SECRETSYNC_REGION", "AWS_REGION", "AWS_DEFAULT_REGION"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
  /// All entries in one JSON secret.
  #[default]
  #[serde(rename = "secrets_manager", alias = "blob")]
  Blob,
  /// One parameter per entry under a shared path.
  #[serde(rename = "parameter_store", alias = "path_prefixed")]
  PathPrefixed,
}

impl fmt::Display for BackendKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BackendKind::Blob => write!(f, "secrets_manager"),
      BackendKind::PathPrefixed => write!(f, "parameter_store"),
    }
  }
}

impl FromStr for BackendKind {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "secrets_manager" | "blob" => Ok(BackendKind::Blob),
      "parameter_store" | "path_prefixed" => Ok(BackendKind::PathPrefixed),
      other => Err(SyncError::ConfigMismatch(format!(
        "unknown backend type '{}', expected one of: parameter_store, secrets_manager",
        other
      ))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub backend: BackendKind,
  pub region: String,
  pub secret_name: Option<String>,
  pub parameter_path: Option<String>,
  /// Per-operation timeout for remote calls.
  pub timeout_secs: u64,
  /// Extra sensitive-key fragments, added to the built-in ones.
  pub sensitive_fragments: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backend: BackendKind::default(),
      region: DEFAULT_REGION.to_string(),
      secret_name: None,
      parameter_path: Some(DEFAULT_PARAMETER_PATH.to_string()),
      timeout_secs: DEFAULT_TIMEOUT_SECS,
      sensitive_fragments: Vec::new(),
    }
  }
}

/// The remote location a validated [`Config`] points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
  Blob { secret_name: String },
  /// `prefix` always ends with `/`.
  PathPrefixed { prefix: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
  backend: BackendSection,
  secrets_manager: SecretsManagerSection,
  parameter_store: ParameterStoreSection,
  mask: MaskSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendSection {
  #[serde(rename = "type")]
  kind: Option<BackendKind>,
  region: Option<String>,
  timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecretsManagerSection {
  secret_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ParameterStoreSection {
  path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MaskSection {
  patterns: Vec<String>,
}

impl Config {
  /// Loads `path` (or `.secretsync.toml`). A missing file yields defaults.
  pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    match std::fs::read_to_string(path) {
      Ok(text) => Self::from_toml(&text, path),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        #[cfg(feature = "tracing")]
        debug!(?path, "No config file, using defaults");
        Ok(Self::default())
      }
      Err(err) => Err(SyncError::Config {
        path: path.to_path_buf(),
        message: err.to_string(),
      }),
    }
  }

  pub fn from_toml(text: &str, path: &Path) -> Result<Self, SyncError> {
    let file: FileConfig = toml::from_str(text).map_err(|err| SyncError::Config {
      path: path.to_path_buf(),
      message: err.to_string(),
    })?;

    let defaults = Self::default();
    Ok(Self {
      backend: file.backend.kind.unwrap_or(defaults.backend),
      region: file.backend.region.unwrap_or(defaults.region),
      secret_name: file.secrets_manager.secret_name,
      parameter_path: file.parameter_store.path.or(defaults.parameter_path),
      timeout_secs: file.backend.timeout_secs.unwrap_or(defaults.timeout_secs),
      sensitive_fragments: file.mask.patterns,
    })
  }

  /// Applies `SECRETSYNC_*` and AWS region overrides using `lookup`.
  pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, SyncError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(kind) = lookup("SECRETSYNC_BACKEND") {
      self.backend = kind.parse()?;
    }
    if let Some(region) = REGION_VARS.iter().find_map(|name| lookup(*name)) {
      self.region = region;
    }
    if let Some(name) = lookup("SECRETSYNC_SECRET_NAME") {
      self.secret_name = Some(name);
    }
    if let Some(path) = lookup("SECRETSYNC_PARAMETER_PATH") {
      self.parameter_path = Some(path);
    }
    Ok(self)
  }

  /// Overrides from the process environment.
  pub fn with_process_env(self) -> Result<Self, SyncError> {
    self.with_env_overrides(|name| std::env::var(name).ok())
  }

  /// Checks the config is internally consistent and resolves the target.
  pub fn validate(&self) -> Result<BackendTarget, SyncError> {
    if self.region.trim().is_empty() {
      return Err(SyncError::ConfigMismatch("region must not be empty".to_string()));
    }
    if self.timeout_secs == 0 {
      return Err(SyncError::ConfigMismatch(
        "timeout_secs must be greater than zero".to_string(),
      ));
    }

    match self.backend {
      BackendKind::Blob => match self.secret_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(BackendTarget::Blob {
          secret_name: name.to_string(),
        }),
        _ => Err(SyncError::ConfigMismatch(
          "secrets_manager.secret_name is required when backend type is 'secrets_manager' \
           (set it in .secretsync.toml or via SECRETSYNC_SECRET_NAME)"
            .to_string(),
        )),
      },
      BackendKind::PathPrefixed => match self.parameter_path.as_deref() {
        Some(path) if path.starts_with('/') => Ok(BackendTarget::PathPrefixed {
          prefix: normalize_prefix(path),
        }),
        _ => Err(SyncError::ConfigMismatch(
          "parameter_store.path must be an absolute path starting with '/' \
           (set it in .secretsync.toml or via SECRETSYNC_PARAMETER_PATH)"
            .to_string(),
        )),
      },
    }
  }
}

pub(crate) fn normalize_prefix(path: &str) -> String {
  if path.ends_with('/') {
    path.to_string()
  } else {
    format!("{}/", path)
  }
}
