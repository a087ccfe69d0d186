//! Run configuration.
//!
//! Options come from the process environment and an optional `.env` file,
//! in that order of precedence. Both are snapshotted into [`ConfigSources`]
//! up front; nothing here reads or mutates the live environment afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::period::BillingPeriod;

pub const ENV_EMAIL: &str = "OPENAI_EMAIL";
pub const ENV_PASSWORD: &str = "OPENAI_PASSWORD";
pub const ENV_OUTPUT_DIR: &str = "OUTPUT_DIR";
pub const ENV_HEADLESS: &str = "HEADLESS";
pub const ENV_BUCKET: &str = "S3_BUCKET";
pub const ENV_KEY_PREFIX: &str = "S3_PREFIX";
pub const ENV_SECRET_NAME: &str = "AWS_SECRET_NAME";
pub const ENV_REGION: &str = "AWS_REGION";
pub const ENV_PERIOD: &str = "INVOICE_PERIOD";
pub const ENV_LOGIN_TIMEOUT: &str = "LOGIN_TIMEOUT";
pub const ENV_DOWNLOAD_TIMEOUT: &str = "DOWNLOAD_TIMEOUT";
pub const ENV_CHROME_PATH: &str = "CHROME_PATH";

pub const DEFAULT_OUTPUT_DIR: &str = "/tmp/invoices";
pub const DEFAULT_SECRET_NAME: &str = "catholically/openai";
pub const DEFAULT_REGION: &str = "eu-south-1";
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a configuration value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Environment,
    EnvFile,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Environment => write!(f, "environment"),
            ValueSource::EnvFile => write!(f, "env file"),
        }
    }
}

/// Snapshot of the environment and `.env` file values.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    env: HashMap<String, String>,
    env_file: HashMap<String, String>,
    env_file_path: Option<PathBuf>,
}

impl ConfigSources {
    pub fn new(env: HashMap<String, String>, env_file: HashMap<String, String>) -> Self {
        Self {
            env,
            env_file,
            env_file_path: None,
        }
    }

    /// Build from a list of environment pairs only (handy in tests).
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let env = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(env, HashMap::new())
    }

    /// Snapshot the process environment and an env file.
    ///
    /// With `env_file = None`, `./.env` is read if it exists. An explicitly
    /// requested file that is missing or unparsable is an error.
    pub fn from_process(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();

        let (path, required) = match env_file {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(".env"), false),
        };

        let file_values = if path.exists() {
            Some(read_env_file(&path)?)
        } else if required {
            return Err(ConfigError::EnvFile {
                path,
                reason: "file does not exist".to_string(),
            });
        } else {
            None
        };

        Ok(Self {
            env,
            env_file_path: file_values.as_ref().map(|_| path.clone()),
            env_file: file_values.unwrap_or_default(),
        })
    }

    /// Path of the env file that was read, if any.
    pub fn env_file_path(&self) -> Option<&Path> {
        self.env_file_path.as_deref()
    }

    /// First non-empty value for `key`, and where it came from.
    pub fn lookup(&self, key: &str) -> Option<(&str, ValueSource)> {
        if let Some(value) = self.env.get(key).filter(|v| !v.trim().is_empty()) {
            return Some((value.as_str(), ValueSource::Environment));
        }
        self.env_file
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .map(|value| (value.as_str(), ValueSource::EnvFile))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lookup(key).map(|(value, _)| value)
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_err = |e: dotenvy::Error| ConfigError::EnvFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(to_err)? {
        let (key, value) = item.map_err(to_err)?;
        values.insert(key, value);
    }
    Ok(values)
}

/// Immutable options for one run. Never holds credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub headless: bool,
    /// Archive bucket; `None` disables archiving.
    pub bucket: Option<String>,
    /// Prepended to `{service}/{YYYYMM}.pdf` when building the object key.
    pub key_prefix: String,
    pub secret_name: String,
    pub region: String,
    /// Target period; `None` means the previous calendar month.
    pub period: Option<BillingPeriod>,
    pub login_timeout: Duration,
    pub download_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            headless: true,
            bucket: None,
            key_prefix: String::new(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            period: None,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            chrome_path: None,
        }
    }
}

impl RunConfig {
    /// Resolve every non-secret option, falling back to the documented defaults.
    pub fn resolve(sources: &ConfigSources) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let headless = match sources.get(ENV_HEADLESS) {
            Some(raw) => parse_bool(ENV_HEADLESS, raw)?,
            None => defaults.headless,
        };

        let period = sources
            .get(ENV_PERIOD)
            .map(|raw| {
                raw.parse::<BillingPeriod>()
                    .map_err(|e| ConfigError::InvalidValue {
                        var: ENV_PERIOD,
                        value: raw.to_string(),
                        reason: e.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            output_dir: sources
                .get(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            headless,
            bucket: sources.get(ENV_BUCKET).map(|s| s.trim().to_string()),
            key_prefix: sources
                .get(ENV_KEY_PREFIX)
                .map(normalize_prefix)
                .unwrap_or_default(),
            secret_name: sources
                .get(ENV_SECRET_NAME)
                .map(str::to_string)
                .unwrap_or(defaults.secret_name),
            region: sources
                .get(ENV_REGION)
                .map(str::to_string)
                .unwrap_or(defaults.region),
            period,
            login_timeout: duration_option(sources, ENV_LOGIN_TIMEOUT)?
                .unwrap_or(defaults.login_timeout),
            download_timeout: duration_option(sources, ENV_DOWNLOAD_TIMEOUT)?
                .unwrap_or(defaults.download_timeout),
            chrome_path: sources.get(ENV_CHROME_PATH).map(PathBuf::from),
        })
    }

    pub fn archiving_enabled(&self) -> bool {
        self.bucket.is_some()
    }
}

fn duration_option(
    sources: &ConfigSources,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    sources
        .get(var)
        .map(|raw| {
            parse_duration(raw).map_err(|e| ConfigError::InvalidValue {
                var,
                value: raw.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Object key prefixes always end with exactly one `/` and never start with one.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

pub fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
