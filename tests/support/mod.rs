#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use invoice_archiver::archive::ObjectStore;
use invoice_archiver::browser::{
    BrowserLauncher, BrowserSession, DownloadCandidate, ElementQuery, LaunchOptions,
};
use invoice_archiver::credentials::CredentialStore;
use invoice_archiver::provider::Provider;
use secrecy::SecretString;

/// The OpenAI provider with waits shortened for tests.
pub fn fast_provider() -> Provider {
    Provider {
        settle: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
        ..Provider::openai()
    }
}

pub fn candidate(index: usize, label: &str, context: &str) -> DownloadCandidate {
    DownloadCandidate {
        index,
        label: label.to_string(),
        context: context.to_string(),
        href: None,
        has_download_attr: false,
    }
}

#[derive(Debug, Default)]
struct State {
    url: Option<String>,
    present: HashSet<ElementQuery>,
    secret_query: Option<ElementQuery>,
    secret_filled: bool,
    redirect_after_login: Option<String>,
    /// Elements that appear once the secret has been submitted.
    shown_after_login: Vec<ElementQuery>,
    /// Elements that appear when a given element is clicked.
    reveals: HashMap<ElementQuery, Vec<ElementQuery>>,
    failing_screenshots: bool,
    candidates: Vec<DownloadCandidate>,
    payloads: HashMap<usize, Vec<u8>>,
    visited: Vec<String>,
    fills: Vec<(String, String)>,
    clicks: Vec<ElementQuery>,
    screenshots: Vec<PathBuf>,
    closed: bool,
}

/// An in-memory page that follows a provider's login form.
///
/// The login inputs and buttons are present from the start unless
/// [`ScriptedBrowser::with_landing_page`] hides them. Submitting after the
/// secret has been filled moves the page to the configured redirect URL;
/// without one the page stays on the login screen.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBrowser {
    state: Arc<Mutex<State>>,
}

impl ScriptedBrowser {
    pub fn new(provider: &Provider) -> Self {
        let present = [
            provider.identity_input,
            provider.identity_submit,
            provider.secret_input,
            provider.secret_submit,
        ]
        .into_iter()
        .filter_map(|queries| queries.first().copied())
        .collect();

        Self {
            state: Arc::new(Mutex::new(State {
                present,
                secret_query: provider.secret_input.first().copied(),
                redirect_after_login: Some("https://platform.openai.com/playground".to_string()),
                ..State::default()
            })),
        }
    }

    pub fn with_redirect(self, url: Option<&str>) -> Self {
        self.state.lock().unwrap().redirect_after_login = url.map(str::to_string);
        self
    }

    /// Hide the email field behind a landing "Log in" button and a
    /// "Continue with email" choice.
    pub fn with_landing_page(self, provider: &Provider) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let (Some(landing), Some(email_choice), Some(identity)) = (
                provider.landing_login.first().copied(),
                provider.continue_with_email.first().copied(),
                provider.identity_input.first().copied(),
            ) else {
                panic!("provider has no landing page selectors");
            };
            state.present.remove(&identity);
            state.present.insert(landing);
            state.reveals.insert(landing, vec![email_choice]);
            state.reveals.insert(email_choice, vec![identity]);
        }
        self
    }

    /// Show a one-time-code input instead of redirecting after login.
    pub fn with_code_prompt(self, provider: &Provider) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.redirect_after_login = None;
            state.shown_after_login = provider
                .challenge_markers
                .first()
                .copied()
                .into_iter()
                .collect();
        }
        self
    }

    pub fn with_failing_screenshots(self) -> Self {
        self.state.lock().unwrap().failing_screenshots = true;
        self
    }

    pub fn with_candidates(self, candidates: Vec<DownloadCandidate>) -> Self {
        self.state.lock().unwrap().candidates = candidates;
        self
    }

    pub fn with_payload(self, index: usize, bytes: &[u8]) -> Self {
        self.set_payload(index, bytes);
        self
    }

    pub fn set_payload(&self, index: usize, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .payloads
            .insert(index, bytes.to_vec());
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().fills.clone()
    }

    pub fn clicks(&self) -> Vec<ElementQuery> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().screenshots.clone()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.visited.push(url.to_string());
        state.url = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn exists(&self, queries: &[ElementQuery]) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(queries.iter().any(|q| state.present.contains(q)))
    }

    async fn click(&self, queries: &[ElementQuery]) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(query) = queries.iter().find(|q| state.present.contains(*q)).copied() else {
            return Ok(false);
        };
        state.clicks.push(query);
        if let Some(revealed) = state.reveals.get(&query).cloned() {
            state.present.extend(revealed);
        }
        if state.secret_filled {
            if let Some(redirect) = state.redirect_after_login.clone() {
                state.url = Some(redirect);
            }
            let shown = state.shown_after_login.clone();
            state.present.extend(shown);
        }
        Ok(true)
    }

    async fn fill(&self, queries: &[ElementQuery], value: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(query) = queries.iter().find(|q| state.present.contains(*q)).copied() else {
            return Ok(false);
        };
        state.fills.push((query.selector.to_string(), value.to_string()));
        if state.secret_query == Some(query) {
            state.secret_filled = true;
        }
        Ok(true)
    }

    async fn download_candidates(&self) -> Result<Vec<DownloadCandidate>> {
        Ok(self.state.lock().unwrap().candidates.clone())
    }

    async fn download(&self, candidate: &DownloadCandidate, _timeout: Duration) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        match state.payloads.get(&candidate.index) {
            Some(bytes) => Ok(bytes.clone()),
            None => anyhow::bail!("no file appeared for element {}", candidate.index),
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        if self.state.lock().unwrap().failing_screenshots {
            anyhow::bail!("Page.captureScreenshot: target closed");
        }
        std::fs::write(path, b"\x89PNG scripted")?;
        self.state.lock().unwrap().screenshots.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out clones of one scripted browser and counts launches.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    browser: ScriptedBrowser,
    launches: AtomicUsize,
    fail: bool,
}

impl ScriptedLauncher {
    pub fn new(browser: ScriptedBrowser) -> Self {
        Self {
            browser,
            launches: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("Chrome/Chromium not found");
        }
        Ok(Box::new(self.browser.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<StoredObject>>,
    fail: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        if self.fail {
            anyhow::bail!("AccessDenied: not authorized to perform s3:PutObject");
        }
        self.objects.lock().unwrap().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            content_type: content_type.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    values: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(self
            .values
            .get(key)
            .map(|v| SecretString::from(v.clone())))
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
