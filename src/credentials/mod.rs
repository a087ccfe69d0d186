//! Login credentials and where they come from.
//!
//! Each credential field is looked up in the environment, then the `.env`
//! file, then a remote [`CredentialStore`]. The store is only consulted when
//! something is still missing.

#[cfg(feature = "aws")]
mod secrets_manager;

#[cfg(feature = "aws")]
pub use secrets_manager::SecretsManagerStore;

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{ConfigSources, ENV_EMAIL, ENV_PASSWORD};
use crate::error::ConfigError;

/// Key of the identity (login email) in a credential store entry.
pub const IDENTITY_KEY: &str = "email";
/// Key of the secret (password) in a credential store entry.
pub const SECRET_KEY: &str = "password";

/// A read-only key-value store for credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a credential by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    /// Returns `Err` if there was an error accessing the backend.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;

    /// Short description for log lines, e.g. the secret name.
    fn describe(&self) -> String;
}

/// Identity and secret used to log in. Neither is ever logged.
#[derive(Debug)]
pub struct Credentials {
    identity: SecretString,
    secret: SecretString,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: SecretString::from(identity.into()),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn identity(&self) -> &SecretString {
        &self.identity
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// The identity reduced to its first three characters, for progress output.
    pub fn masked_identity(&self) -> String {
        mask(self.identity.expose_secret())
    }
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(3).collect();
    format!("{visible}***")
}

/// Parse a secret store payload: a JSON object of string fields.
///
/// Non-string values are ignored.
pub fn parse_secret_entry(raw: &str) -> Result<HashMap<String, String>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("Secret is not valid JSON")?;
    let object = value
        .as_object()
        .context("Secret JSON must be an object with email/password fields")?;

    Ok(object
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect())
}

/// Resolve credentials from the sources in priority order.
///
/// Fails with [`ConfigError::MissingCredential`] before any browser work if
/// either field cannot be found anywhere.
pub async fn resolve_credentials(
    sources: &ConfigSources,
    store: Option<&dyn CredentialStore>,
) -> Result<Credentials, ConfigError> {
    let mut identity = sources.lookup(ENV_EMAIL).map(|(value, source)| {
        tracing::debug!(%source, "Identity found");
        SecretString::from(value.to_string())
    });
    let mut secret = sources.lookup(ENV_PASSWORD).map(|(value, source)| {
        tracing::debug!(%source, "Secret found");
        SecretString::from(value.to_string())
    });

    let mut store_error = None;
    if identity.is_none() || secret.is_none() {
        match store {
            Some(store) => {
                match fill_from_store(store, &mut identity, &mut secret).await {
                    Ok(()) => {
                        if identity.is_some() && secret.is_some() {
                            tracing::info!(store = %store.describe(), "Using credentials from secret store");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(store = %store.describe(), error = %format!("{err:#}"), "Secret store lookup failed");
                        store_error = Some(format!("{err:#}"));
                    }
                }
            }
            None => store_error = Some("not configured".to_string()),
        }
    } else {
        tracing::info!("Using credentials from environment");
    }

    let identity = identity.ok_or_else(|| ConfigError::MissingCredential {
        field: "identity",
        env_var: ENV_EMAIL,
        secret_store: store_error.clone(),
    })?;
    let secret = secret.ok_or_else(|| ConfigError::MissingCredential {
        field: "secret",
        env_var: ENV_PASSWORD,
        secret_store: store_error,
    })?;

    Ok(Credentials { identity, secret })
}

async fn fill_from_store(
    store: &dyn CredentialStore,
    identity: &mut Option<SecretString>,
    secret: &mut Option<SecretString>,
) -> Result<()> {
    if identity.is_none() {
        *identity = store.get(IDENTITY_KEY).await?.filter(not_blank);
    }
    if secret.is_none() {
        *secret = store.get(SECRET_KEY).await?.filter(not_blank);
    }
    Ok(())
}

fn not_blank(value: &SecretString) -> bool {
    !value.expose_secret().trim().is_empty()
}
