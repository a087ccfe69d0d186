//! Fetching invoice links over HTTP with the browser's session cookies.

use anyhow::{Context, Result};
use reqwest::{Client, Url};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

/// A cookie captured from the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub domain: String,
    pub path: String,
    pub name: String,
    pub value: String,
    /// Only sent over https.
    pub secure: bool,
}

/// Format the cookies that apply to `url` as a `Cookie` header value.
///
/// A cookie applies when its domain (leading dot ignored) equals the URL host
/// or is a parent domain of it, its path is a prefix of the URL path, and it
/// is not a `secure` cookie headed for a plain http URL.
pub fn cookie_header(url: &Url, cookies: &[SessionCookie]) -> Option<String> {
    let host = url.host_str()?;
    let https = url.scheme() == "https";
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| https || !c.secure)
        .filter(|c| domain_matches(host, &c.domain))
        .filter(|c| path_matches(url.path(), &c.path))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    host.eq_ignore_ascii_case(domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if cookie_path.is_empty() || cookie_path == "/" {
        return true;
    }
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => cookie_path.ends_with('/') || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// HTTP client used for direct invoice downloads.
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// GET `url`, sending the cookies that apply to it.
    pub async fn fetch(&self, url: &str, cookies: &[SessionCookie]) -> Result<Vec<u8>> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid download URL: {url}"))?;

        let mut request = self.client.get(parsed.clone());
        if let Some(header) = cookie_header(&parsed, cookies) {
            request = request.header(reqwest::header::COOKIE, header);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Download from {url} returned HTTP {status}");
        }

        // A hosted invoice page or a login redirect, not the file itself.
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("text/html") {
            anyhow::bail!("Download from {url} returned an HTML page, not a file");
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body from {url}"))?;
        Ok(bytes.to_vec())
    }
}
