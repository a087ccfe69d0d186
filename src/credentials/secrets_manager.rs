//! AWS Secrets Manager credential backend.
//!
//! The secret is a JSON object such as `{"email": "...", "password": "..."}`.
//! It is fetched once, on first use, and kept in memory for the rest of the run.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_secretsmanager::Client;
use secrecy::SecretString;
use tokio::sync::OnceCell;

use super::{parse_secret_entry, CredentialStore};

/// Credential store backed by a single Secrets Manager secret.
pub struct SecretsManagerStore {
    client: Client,
    secret_id: String,
    entry: OnceCell<HashMap<String, String>>,
}

impl SecretsManagerStore {
    pub fn new(sdk_config: &aws_config::SdkConfig, secret_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(sdk_config),
            secret_id: secret_id.into(),
            entry: OnceCell::new(),
        }
    }

    async fn fetch_entry(&self) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .with_context(|| format!("GetSecretValue failed for {}", self.secret_id))?;

        let raw = response
            .secret_string()
            .with_context(|| format!("Secret {} has no string value", self.secret_id))?;

        parse_secret_entry(raw)
            .with_context(|| format!("Failed to parse secret {}", self.secret_id))
    }
}

#[async_trait]
impl CredentialStore for SecretsManagerStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        let entry = self.entry.get_or_try_init(|| self.fetch_entry()).await?;
        Ok(entry.get(key).map(|v| SecretString::from(v.clone())))
    }

    fn describe(&self) -> String {
        format!("aws-secretsmanager:{}", self.secret_id)
    }
}
