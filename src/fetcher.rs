//! Retrieve a located invoice and store it in the output directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::BrowserSession;
use crate::error::DownloadError;
use crate::locator::InvoiceReference;
use crate::period::BillingPeriod;

const PDF_MAGIC: &[u8] = b"%PDF";

/// An invoice written to local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub size: u64,
    pub period: BillingPeriod,
}

/// `{output_dir}/{service}_invoice_{YYYYMM}.pdf`
pub fn invoice_path(output_dir: &Path, service: &str, period: BillingPeriod) -> PathBuf {
    output_dir.join(format!("{service}_invoice_{}.pdf", period.compact()))
}

/// Download the referenced invoice and write it to disk.
pub async fn fetch_invoice(
    session: &dyn BrowserSession,
    reference: &InvoiceReference,
    service: &str,
    output_dir: &Path,
    timeout: Duration,
) -> Result<DownloadedArtifact, DownloadError> {
    tracing::info!(period = %reference.period, "Downloading invoice");
    let bytes = session
        .download(&reference.target, timeout)
        .await
        .map_err(DownloadError::Retrieve)?;

    write_artifact(output_dir, service, reference.period, &bytes).await
}

/// Write invoice bytes, replacing any earlier file for the same period.
///
/// Anything that is not a PDF (an HTML invoice page, a login redirect) is
/// rejected without touching the output directory.
pub async fn write_artifact(
    output_dir: &Path,
    service: &str,
    period: BillingPeriod,
    bytes: &[u8],
) -> Result<DownloadedArtifact, DownloadError> {
    if bytes.is_empty() {
        return Err(DownloadError::EmptyPayload { period });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(DownloadError::NotPdf {
            period,
            bytes: bytes.len(),
            preview: preview(bytes),
        });
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|source| DownloadError::Write {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let path = invoice_path(output_dir, service, period);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| DownloadError::Write {
            path: path.clone(),
            source,
        })?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "Invoice saved");
    Ok(DownloadedArtifact {
        path,
        size: bytes.len() as u64,
        period,
    })
}

fn preview(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(24)];
    String::from_utf8_lossy(head).into_owned()
}
