//! AWS clients: Secrets Manager for the blob layout, SSM Parameter Store for
//! the path-prefixed one.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_ssm::types::ParameterType;
#[cfg(feature = "tracing")]
use tracing::debug;

use super::{ClientError, ParameterClient, SecretBlobClient};
use crate::config::Config;

const MAX_ATTEMPTS: u32 = 3;

/// Shared SDK settings: region from `config`, adaptive retries and a
/// per-operation timeout.
pub async fn load_sdk_config(config: &Config) -> SdkConfig {
  #[cfg(feature = "tracing")]
  debug!(region = %config.region, timeout_secs = config.timeout_secs, "Loading AWS config");

  aws_config::defaults(BehaviorVersion::latest())
    .region(Region::new(config.region.clone()))
    .retry_config(RetryConfig::adaptive().with_max_attempts(MAX_ATTEMPTS))
    .timeout_config(
      TimeoutConfig::builder()
        .operation_timeout(Duration::from_secs(config.timeout_secs))
        .build(),
    )
    .load()
    .await
}

fn client_error<E: std::error::Error>(context: &str, err: E) -> ClientError {
  ClientError::new(format!("{}: {}", context, DisplayErrorContext(err)))
}

pub struct SecretsManagerClient {
  client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerClient {
  pub fn new(sdk: &SdkConfig) -> Self {
    Self {
      client: aws_sdk_secretsmanager::Client::new(sdk),
    }
  }
}

#[async_trait]
impl SecretBlobClient for SecretsManagerClient {
  async fn get(&self, name: &str) -> Result<Option<String>, ClientError> {
    match self.client.get_secret_value().secret_id(name).send().await {
      Ok(output) => Ok(output.secret_string().map(str::to_string)),
      Err(err)
        if err
          .as_service_error()
          .is_some_and(|e| e.is_resource_not_found_exception()) =>
      {
        Ok(None)
      }
      Err(err) => Err(client_error(&format!("reading secret '{}'", name), err)),
    }
  }

  /// Adds a new version, creating the secret on first write.
  async fn put(&self, name: &str, payload: &str) -> Result<(), ClientError> {
    let result = self
      .client
      .put_secret_value()
      .secret_id(name)
      .secret_string(payload)
      .send()
      .await;

    match result {
      Ok(_) => Ok(()),
      Err(err)
        if err
          .as_service_error()
          .is_some_and(|e| e.is_resource_not_found_exception()) =>
      {
        #[cfg(feature = "tracing")]
        debug!(secret = %name, "Secret does not exist, creating it");

        self
          .client
          .create_secret()
          .name(name)
          .secret_string(payload)
          .send()
          .await
          .map(|_| ())
          .map_err(|err| client_error(&format!("creating secret '{}'", name), err))
      }
      Err(err) => Err(client_error(&format!("writing secret '{}'", name), err)),
    }
  }
}

pub struct SsmClient {
  client: aws_sdk_ssm::Client,
}

impl SsmClient {
  pub fn new(sdk: &SdkConfig) -> Self {
    Self {
      client: aws_sdk_ssm::Client::new(sdk),
    }
  }
}

#[async_trait]
impl ParameterClient for SsmClient {
  async fn list(&self, path: &str) -> Result<Vec<(String, String)>, ClientError> {
    let mut pages = self
      .client
      .get_parameters_by_path()
      .path(path)
      .recursive(false)
      .with_decryption(true)
      .into_paginator()
      .send();

    let mut parameters = Vec::new();
    while let Some(page) = pages.next().await {
      let page = page.map_err(|err| client_error(&format!("listing '{}'", path), err))?;
      for parameter in page.parameters() {
        if let (Some(name), Some(value)) = (parameter.name(), parameter.value()) {
          parameters.push((name.to_string(), value.to_string()));
        }
      }
    }
    Ok(parameters)
  }

  async fn put(&self, name: &str, value: &str) -> Result<(), ClientError> {
    self
      .client
      .put_parameter()
      .name(name)
      .value(value)
      .r#type(ParameterType::SecureString)
      .overwrite(true)
      .send()
      .await
      .map(|_| ())
      .map_err(|err| client_error(&format!("writing parameter '{}'", name), err))
  }

  async fn delete(&self, names: &[String]) -> Result<(), ClientError> {
    self
      .client
      .delete_parameters()
      .set_names(Some(names.to_vec()))
      .send()
      .await
      .map(|_| ())
      .map_err(|err| client_error("deleting parameters", err))
  }
}
