//! Find the download link for one billing period on the billing page.

use std::path::Path;

use crate::browser::{capture_diagnostic, BrowserSession, DownloadCandidate};
use crate::error::NotFoundError;
use crate::period::{mentioned_periods, BillingPeriod};
use crate::provider::Provider;

/// Screenshot written when no invoice matches.
pub const BILLING_PAGE_SCREENSHOT: &str = "billing_page.png";

const LABEL_HINTS: [&str; 3] = ["pdf", "download", "invoice"];
const HREF_HINTS: [&str; 2] = ["invoice", "pdf"];

/// A located invoice, ready for the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReference {
    pub period: BillingPeriod,
    pub target: DownloadCandidate,
}

/// Whether the element looks like it leads to an invoice file.
pub fn is_download_affordance(candidate: &DownloadCandidate) -> bool {
    let label = candidate.label.to_lowercase();
    let href = candidate.href.as_deref().unwrap_or_default().to_lowercase();

    candidate.has_download_attr
        || LABEL_HINTS.iter().any(|hint| label.contains(hint))
        || HREF_HINTS.iter().any(|hint| href.contains(hint))
}

/// Text in which a candidate's period is looked for: its own label first,
/// then the surrounding row.
fn candidate_text(candidate: &DownloadCandidate) -> String {
    format!("{} {}", candidate.label, candidate.context)
}

/// Pick the first download affordance, in page order, that mentions `period`.
pub fn select_invoice(
    candidates: &[DownloadCandidate],
    period: BillingPeriod,
) -> Result<InvoiceReference, NotFoundError> {
    let affordances: Vec<&DownloadCandidate> = candidates
        .iter()
        .filter(|c| is_download_affordance(c))
        .collect();

    let mut seen = Vec::new();
    for candidate in &affordances {
        let periods = mentioned_periods(&candidate_text(candidate));
        tracing::debug!(
            index = candidate.index,
            label = %candidate.label,
            periods = ?periods,
            "Inspecting download candidate"
        );
        if periods.contains(&period) {
            return Ok(InvoiceReference {
                period,
                target: (*candidate).clone(),
            });
        }
        for p in periods {
            if !seen.contains(&p) {
                seen.push(p);
            }
        }
    }

    Err(NotFoundError::NoMatch {
        period,
        inspected: affordances.len(),
        seen,
    })
}

/// Open the billing page and locate the invoice for `period`.
///
/// On failure a full-page screenshot is saved to
/// `{output_dir}/billing_page.png` before the error is returned.
pub async fn locate_invoice(
    session: &dyn BrowserSession,
    provider: &Provider,
    period: BillingPeriod,
    output_dir: &Path,
) -> Result<InvoiceReference, NotFoundError> {
    let result = scan_billing_page(session, provider, period).await;
    if let Err(err) = &result {
        tracing::error!(error = %err, "Invoice not found");
        capture_diagnostic(session, &output_dir.join(BILLING_PAGE_SCREENSHOT)).await;
    }
    result
}

async fn scan_billing_page(
    session: &dyn BrowserSession,
    provider: &Provider,
    period: BillingPeriod,
) -> Result<InvoiceReference, NotFoundError> {
    tracing::info!(url = provider.billing_url, "Navigating to billing history");
    session
        .goto(provider.billing_url)
        .await
        .map_err(NotFoundError::Browser)?;
    if !provider.settle.is_zero() {
        tokio::time::sleep(provider.settle).await;
    }

    let candidates = session
        .download_candidates()
        .await
        .map_err(NotFoundError::Browser)?;
    tracing::info!(elements = candidates.len(), %period, "Looking for invoice");

    let reference = select_invoice(&candidates, period)?;
    tracing::info!(
        label = %reference.target.label,
        index = reference.target.index,
        "Found invoice download link"
    );
    Ok(reference)
}
