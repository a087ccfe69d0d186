//! Narrow browser interface used by the login, locate and fetch steps.
//!
//! The real implementation drives Chrome over the DevTools protocol
//! ([`ChromeLauncher`]); tests substitute a scripted session.

#[cfg(feature = "browser")]
mod chrome;
#[cfg(feature = "browser")]
pub mod http;

#[cfg(feature = "browser")]
pub use chrome::{find_chrome, ChromeLauncher, ChromeSession};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A CSS selector, optionally narrowed to elements whose visible text
/// contains `text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ElementQuery {
    pub selector: &'static str,
    pub text: Option<&'static str>,
}

impl ElementQuery {
    pub const fn css(selector: &'static str) -> Self {
        Self {
            selector,
            text: None,
        }
    }

    pub const fn with_text(selector: &'static str, text: &'static str) -> Self {
        Self {
            selector,
            text: Some(text),
        }
    }
}

/// A clickable element on the billing page that might lead to an invoice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCandidate {
    /// Position among the page's candidate elements, used to click it later.
    pub index: usize,
    /// The element's own visible text (or aria-label).
    pub label: String,
    /// Text of the enclosing table row or list item, if any.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub has_download_attr: bool,
}

impl DownloadCandidate {
    /// The href, when it can be fetched directly over HTTP.
    pub fn http_url(&self) -> Option<&str> {
        self.href
            .as_deref()
            .filter(|h| h.starts_with("https://") || h.starts_with("http://"))
    }
}

/// Options for starting a browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub executable: Option<PathBuf>,
}

/// One page in a controlled browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the load to finish.
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<Option<String>>;

    /// Whether any of the queries matches an element on the page.
    async fn exists(&self, queries: &[ElementQuery]) -> Result<bool>;

    /// Click the first element matching the first query that matches anything.
    ///
    /// Returns `false` if nothing matched.
    async fn click(&self, queries: &[ElementQuery]) -> Result<bool>;

    /// Type `value` into the first matching input. Returns `false` if nothing matched.
    async fn fill(&self, queries: &[ElementQuery], value: &str) -> Result<bool>;

    /// Every link or button on the page, in document order.
    async fn download_candidates(&self) -> Result<Vec<DownloadCandidate>>;

    /// Retrieve the file behind a candidate.
    async fn download(&self, candidate: &DownloadCandidate, timeout: Duration) -> Result<Vec<u8>>;

    /// Save a full-page PNG screenshot.
    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Shut the browser down.
    async fn close(&self) -> Result<()>;
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>>;
}

/// Screenshot written when login or the download fails.
pub const ERROR_SCREENSHOT: &str = "error_screenshot.png";

/// Save a screenshot without letting a failure escape.
///
/// Returns whether the file was written.
pub async fn capture_diagnostic(session: &dyn BrowserSession, path: &Path) -> bool {
    match session.screenshot(path).await {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Diagnostic screenshot saved");
            true
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "Failed to capture screenshot");
            false
        }
    }
}
