//! Best-effort upload of the downloaded invoice to object storage.
//!
//! The local file is the record of truth. Archiving failures are reported in
//! [`ArchiveOutcome`] and never fail the run.

#[cfg(feature = "aws")]
mod s3;

#[cfg(feature = "aws")]
pub use s3::S3ObjectStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::fetcher::DownloadedArtifact;
use crate::period::BillingPeriod;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Minimal object storage interface.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
}

/// What happened to the remote copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// No bucket configured.
    Skipped,
    Uploaded { uri: String },
    Failed { error: String },
}

impl ArchiveOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ArchiveOutcome::Failed { .. })
    }
}

/// `{prefix}{service}/{YYYYMM}.pdf`
pub fn object_key(prefix: &str, service: &str, period: BillingPeriod) -> String {
    format!("{prefix}{service}/{}.pdf", period.compact())
}

/// Where to put archived invoices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub bucket: String,
    pub key_prefix: String,
}

/// Upload `artifact` if a target is configured.
pub async fn archive(
    store: &dyn ObjectStore,
    target: Option<&ArchiveTarget>,
    service: &str,
    artifact: &DownloadedArtifact,
) -> ArchiveOutcome {
    let Some(target) = target else {
        tracing::info!("No bucket configured, skipping archive");
        return ArchiveOutcome::Skipped;
    };

    match upload(store, target, service, artifact).await {
        Ok(uri) => {
            tracing::info!(%uri, "Upload complete");
            ArchiveOutcome::Uploaded { uri }
        }
        Err(err) => {
            tracing::warn!(error = %err, path = %artifact.path.display(), "Archive failed; local copy kept");
            ArchiveOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}

async fn upload(
    store: &dyn ObjectStore,
    target: &ArchiveTarget,
    service: &str,
    artifact: &DownloadedArtifact,
) -> Result<String, ArchiveError> {
    let body = tokio::fs::read(&artifact.path)
        .await
        .map_err(|source| ArchiveError::Read {
            path: artifact.path.clone(),
            source,
        })?;
    if body.is_empty() {
        return Err(ArchiveError::EmptyArtifact {
            path: artifact.path.clone(),
        });
    }

    let key = object_key(&target.key_prefix, service, artifact.period);
    let uri = format!("s3://{}/{key}", target.bucket);
    tracing::info!(%uri, bytes = body.len(), "Uploading invoice");

    store
        .put_object(&target.bucket, &key, body, PDF_CONTENT_TYPE)
        .await
        .map_err(|error| ArchiveError::Upload {
            uri: uri.clone(),
            error,
        })?;
    Ok(uri)
}
