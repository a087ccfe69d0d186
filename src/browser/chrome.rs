//! Chrome/Chromium session over the DevTools protocol.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::http::{HttpDownloader, SessionCookie};
use super::{BrowserLauncher, BrowserSession, DownloadCandidate, ElementQuery, LaunchOptions};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 720;
const DOWNLOAD_POLL: Duration = Duration::from_millis(250);
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Selector for every element the locator considers. Indices returned by
/// [`ChromeSession::download_candidates`] refer to this node list.
const CANDIDATE_SELECTOR: &str = r#"a, button, [role="button"]"#;

/// Launches a local Chrome or Chromium.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(ChromeSession::launch(options).await?))
    }
}

struct Inner {
    browser: Option<Browser>,
    page: Page,
}

/// A single page in a launched browser, with downloads routed to a
/// temporary staging directory.
pub struct ChromeSession {
    inner: Mutex<Inner>,
    handler_task: JoinHandle<()>,
    download_dir: TempDir,
    http: HttpDownloader,
}

impl ChromeSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let chrome_path = match &options.executable {
            Some(path) => path.display().to_string(),
            None => find_chrome().context(
                "Chrome/Chromium not found. Install it or set CHROME_PATH to the executable.",
            )?,
        };
        tracing::info!(executable = %chrome_path, headless = options.headless, "Launching browser");

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .viewport(Viewport {
                width: VIEWPORT_WIDTH,
                height: VIEWPORT_HEIGHT,
                ..Viewport::default()
            })
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox");
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser.new_page("about:blank").await?;

        let download_dir = tempfile::Builder::new()
            .prefix("invoice-download-")
            .tempdir()
            .context("Failed to create download staging dir")?;
        setup_download_handling(&page, download_dir.path()).await?;

        Ok(Self {
            inner: Mutex::new(Inner {
                browser: Some(browser),
                page,
            }),
            handler_task,
            download_dir,
            http: HttpDownloader::new(HTTP_TIMEOUT)?,
        })
    }

    async fn page(&self) -> Page {
        self.inner.lock().await.page.clone()
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        let page = self.page().await;
        let result = page
            .evaluate_expression(script)
            .await
            .context("Script evaluation failed")?;
        result
            .into_value::<T>()
            .context("Unexpected script result")
    }

    async fn session_cookies(&self) -> Result<Vec<SessionCookie>> {
        let cookies = self.page().await.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                domain: c.domain,
                path: c.path,
                name: c.name,
                value: c.value,
                secure: c.secure,
            })
            .collect())
    }

    async fn download_by_click(
        &self,
        candidate: &DownloadCandidate,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let dir = self.download_dir.path();
        let initial = list_dir(dir)?;

        let clicked: bool = self
            .eval(format!(
                r#"(() => {{
                    const el = document.querySelectorAll({selector})[{index}];
                    if (!el) return false;
                    el.scrollIntoView({{block: 'center'}});
                    el.click();
                    return true;
                }})()"#,
                selector = serde_json::to_string(CANDIDATE_SELECTOR)?,
                index = candidate.index,
            ))
            .await?;
        if !clicked {
            anyhow::bail!("Download element #{} is no longer on the page", candidate.index);
        }

        let path = wait_for_download(dir, &initial, timeout).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read downloaded file: {}", path.display()))?;
        if let Err(err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove staged download");
        }
        Ok(bytes)
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&self, url: &str) -> Result<()> {
        let page = self.page().await;
        page.goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.page().await.url().await?)
    }

    async fn exists(&self, queries: &[ElementQuery]) -> Result<bool> {
        self.eval(query_script(queries, "return true;")?).await
    }

    async fn click(&self, queries: &[ElementQuery]) -> Result<bool> {
        self.eval(query_script(
            queries,
            "el.scrollIntoView({block: 'center'}); el.click(); return true;",
        )?)
        .await
    }

    async fn fill(&self, queries: &[ElementQuery], value: &str) -> Result<bool> {
        let page = self.page().await;
        for query in queries.iter().filter(|q| q.text.is_none()) {
            let elements = match page.find_elements(query.selector).await {
                Ok(elements) => elements,
                Err(_) => continue,
            };
            if let Some(element) = elements.into_iter().next() {
                element.click().await?;
                element
                    .call_js_fn("function() { this.value = ''; }", false)
                    .await?;
                element.type_str(value).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn download_candidates(&self) -> Result<Vec<DownloadCandidate>> {
        let raw: String = self
            .eval(format!(
                r#"(() => {{
                    const out = [];
                    document.querySelectorAll({selector}).forEach((el, index) => {{
                        const row = el.closest('tr, li, [role="row"], [data-testid="invoice-row"]');
                        const href = el.getAttribute('href') ? el.href : null;
                        out.push({{
                            index,
                            label: (el.innerText || el.textContent || el.getAttribute('aria-label') || '').trim(),
                            context: row ? (row.innerText || '').trim() : '',
                            href,
                            has_download_attr: el.hasAttribute('download'),
                        }});
                    }});
                    return JSON.stringify(out);
                }})()"#,
                selector = serde_json::to_string(CANDIDATE_SELECTOR)?,
            ))
            .await?;
        serde_json::from_str(&raw).context("Failed to parse candidate list")
    }

    async fn download(&self, candidate: &DownloadCandidate, timeout: Duration) -> Result<Vec<u8>> {
        match candidate.http_url() {
            Some(url) => {
                tracing::debug!(url, "Fetching invoice over HTTP");
                let cookies = self.session_cookies().await?;
                tokio::time::timeout(timeout, self.http.fetch(url, &cookies))
                    .await
                    .with_context(|| format!("Timed out fetching {url}"))?
            }
            None => {
                tracing::debug!(index = candidate.index, "Clicking download element");
                self.download_by_click(candidate, timeout).await
            }
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let page = self.page().await;
        let png = page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .context("Failed to capture screenshot")?;
        tokio::fs::write(path, png)
            .await
            .with_context(|| format!("Failed to write screenshot: {}", path.display()))
    }

    async fn close(&self) -> Result<()> {
        let browser = self.inner.lock().await.browser.take();
        if let Some(mut browser) = browser {
            browser.close().await.context("Failed to close browser")?;
        }
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// Build a script that runs `action` on the first element matching the
/// queries (in order) and otherwise returns `false`.
fn query_script(queries: &[ElementQuery], action: &str) -> Result<String> {
    let queries = serde_json::to_string(queries)?;
    Ok(format!(
        r#"(() => {{
            const queries = {queries};
            const textOf = (el) => (el.innerText || el.textContent || '').trim();
            for (const q of queries) {{
                for (const el of document.querySelectorAll(q.selector)) {{
                    if (q.text !== null && !textOf(el).includes(q.text)) continue;
                    {action}
                }}
            }}
            return false;
        }})()"#
    ))
}

async fn setup_download_handling(page: &Page, download_dir: &Path) -> Result<()> {
    let download_params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(download_dir.display().to_string())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build download params: {e}"))?;

    page.execute(download_params).await?;
    Ok(())
}

fn list_dir(dir: &Path) -> Result<HashSet<PathBuf>> {
    Ok(std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect())
}

/// Wait until a completed file that was not in `initial` shows up in `dir`.
async fn wait_for_download(
    dir: &Path,
    initial: &HashSet<PathBuf>,
    timeout: Duration,
) -> Result<PathBuf> {
    let start = Instant::now();
    loop {
        for file in list_dir(dir)? {
            if initial.contains(&file) {
                continue;
            }
            let filename = file.file_name().unwrap_or_default().to_string_lossy();
            if filename.ends_with(".crdownload") {
                continue;
            }
            return Ok(file);
        }

        if start.elapsed() > timeout {
            anyhow::bail!("No download completed within {}s", timeout.as_secs());
        }
        tokio::time::sleep(DOWNLOAD_POLL).await;
    }
}

/// Find a Chrome/Chromium executable on PATH or in well-known locations.
pub fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    candidates
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(str::to_string)
}
