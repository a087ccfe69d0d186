//! Stage error taxonomy.
//!
//! Each pipeline stage fails with its own error type. Everything except
//! [`ArchiveError`] aborts the run; archive failures are reported through
//! [`crate::archive::ArchiveOutcome`] instead.

use std::path::PathBuf;
use std::time::Duration;

use crate::period::BillingPeriod;

/// A required option is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing {field}: set {env_var} or provide it through the secret store{}", secret_store_note(.secret_store))]
    MissingCredential {
        field: &'static str,
        env_var: &'static str,
        /// Why the secret store could not supply the value, if it was consulted.
        secret_store: Option<String>,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read env file {}: {reason}", .path.display())]
    EnvFile { path: PathBuf, reason: String },

    #[error("failed to create output directory {}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn secret_store_note(note: &Option<String>) -> String {
    match note {
        Some(reason) => format!(" (secret store: {reason})"),
        None => String::new(),
    }
}

/// Login did not produce an authenticated session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("login form has no {field}")]
    MissingField { field: &'static str },

    #[error("login did not complete within {}s (last url: {})", .waited.as_secs(), .url.as_deref().unwrap_or("unknown"))]
    Timeout {
        waited: Duration,
        url: Option<String>,
    },

    #[error("two-factor or verification challenge detected at {url}; automated login is not supported for this account")]
    ChallengeDetected { url: String },

    #[error("browser error during login: {0:#}")]
    Browser(anyhow::Error),
}

/// No invoice for the target period could be located.
#[derive(Debug, thiserror::Error)]
pub enum NotFoundError {
    #[error("no invoice for {period} among {inspected} download link(s){}", seen_note(.seen))]
    NoMatch {
        period: BillingPeriod,
        inspected: usize,
        seen: Vec<BillingPeriod>,
    },

    #[error("billing page could not be scanned: {0:#}")]
    Browser(anyhow::Error),
}

fn seen_note(seen: &[BillingPeriod]) -> String {
    if seen.is_empty() {
        return String::new();
    }
    let periods: Vec<String> = seen.iter().map(ToString::to_string).collect();
    format!("; periods on page: {}", periods.join(", "))
}

/// The located invoice could not be retrieved or written.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("downloaded invoice for {period} is empty")]
    EmptyPayload { period: BillingPeriod },

    #[error("downloaded file for {period} is not a PDF ({bytes} bytes starting {preview:?})")]
    NotPdf {
        period: BillingPeriod,
        bytes: usize,
        preview: String,
    },

    #[error("failed to retrieve invoice: {0:#}")]
    Retrieve(anyhow::Error),

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote archival failed. Never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to read {} for upload", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to upload empty artifact {}", .path.display())]
    EmptyArtifact { path: PathBuf },

    #[error("upload to {uri} failed: {error:#}")]
    Upload { uri: String, error: anyhow::Error },
}

/// Any fatal failure of a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to launch browser: {0:#}")]
    Launch(anyhow::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl RunError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 2,
            RunError::Auth(_) => 3,
            RunError::NotFound(_) => 4,
            RunError::Download(_) => 5,
            RunError::Launch(_) => 1,
        }
    }
}
