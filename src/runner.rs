//! One pass of the pipeline: configure, log in, locate, download, archive.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::archive::{archive, ArchiveOutcome, ArchiveTarget, ObjectStore};
use crate::browser::{
    capture_diagnostic, BrowserLauncher, BrowserSession, LaunchOptions, ERROR_SCREENSHOT,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigSources, RunConfig};
use crate::credentials::{resolve_credentials, CredentialStore, Credentials};
use crate::error::{ConfigError, RunError};
use crate::fetcher::{fetch_invoice, DownloadedArtifact};
use crate::locator::locate_invoice;
use crate::period::BillingPeriod;
use crate::provider::Provider;
use crate::session::authenticate;

/// Where a run is (or where it stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Configuring,
    Authenticating,
    Locating,
    Downloading,
    Archiving,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Configuring => "configuration",
            RunStage::Authenticating => "authentication",
            RunStage::Locating => "invoice lookup",
            RunStage::Downloading => "download",
            RunStage::Archiving => "archive",
            RunStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A completed run. The local PDF exists; the archive may still have failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub period: BillingPeriod,
    pub artifact: DownloadedArtifact,
    pub archive: ArchiveOutcome,
}

/// A run that stopped at `stage`.
#[derive(Debug, thiserror::Error)]
#[error("failed during {stage}: {error}")]
pub struct RunFailure {
    pub stage: RunStage,
    #[source]
    pub error: RunError,
}

impl RunFailure {
    fn at(stage: RunStage) -> impl FnOnce(RunError) -> RunFailure {
        move |error| RunFailure { stage, error }
    }

    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

/// Collaborators for a run.
pub struct RunContext {
    pub provider: Provider,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub credential_store: Option<Arc<dyn CredentialStore>>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub clock: Arc<dyn Clock>,
}

impl RunContext {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            provider: Provider::openai(),
            launcher,
            credential_store: None,
            object_store: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct InvoiceRunner {
    context: RunContext,
}

impl InvoiceRunner {
    pub fn new(context: RunContext) -> Self {
        Self { context }
    }

    /// The configured period, or the previous calendar month.
    pub fn target_period(&self, config: &RunConfig) -> BillingPeriod {
        config
            .period
            .unwrap_or_else(|| BillingPeriod::previous(self.context.clock.today()))
    }

    /// Run the whole pipeline once.
    ///
    /// Credentials are resolved before the browser is launched, so a missing
    /// credential never opens a browser.
    pub async fn run(
        &self,
        config: &RunConfig,
        sources: &ConfigSources,
    ) -> Result<RunOutcome, RunFailure> {
        tracing::info!(stage = %RunStage::Configuring, "Starting run");
        let credentials = resolve_credentials(sources, self.context.credential_store.as_deref())
            .await
            .map_err(|e| RunFailure::at(RunStage::Configuring)(e.into()))?;
        tracing::info!(account = %credentials.masked_identity(), "Credentials resolved");

        let period = self.target_period(config);
        tracing::info!(%period, output_dir = %config.output_dir.display(), "Target billing period");

        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|source| ConfigError::OutputDir {
                path: config.output_dir.clone(),
                source,
            })
            .map_err(|e| RunFailure::at(RunStage::Configuring)(e.into()))?;

        tracing::info!(stage = %RunStage::Authenticating, "Launching browser");
        let options = LaunchOptions {
            headless: config.headless,
            executable: config.chrome_path.clone(),
        };
        let session = self
            .context
            .launcher
            .launch(&options)
            .await
            .map_err(|e| RunFailure::at(RunStage::Authenticating)(RunError::Launch(e)))?;

        let result = self
            .drive(session.as_ref(), config, &credentials, period)
            .await;

        if let Err(err) = session.close().await {
            tracing::warn!(error = %format!("{err:#}"), "Failed to close browser");
        }
        tracing::info!("Browser closed");

        result
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        config: &RunConfig,
        credentials: &Credentials,
        period: BillingPeriod,
    ) -> Result<RunOutcome, RunFailure> {
        let provider = &self.context.provider;
        let output_dir = config.output_dir.as_path();

        authenticate(session, provider, credentials, config.login_timeout, output_dir)
            .await
            .map_err(|e| RunFailure::at(RunStage::Authenticating)(e.into()))?;

        tracing::info!(stage = %RunStage::Locating, "Locating invoice");
        let reference = locate_invoice(session, provider, period, output_dir)
            .await
            .map_err(|e| RunFailure::at(RunStage::Locating)(e.into()))?;

        tracing::info!(stage = %RunStage::Downloading, "Fetching invoice");
        let artifact = match fetch_invoice(
            session,
            &reference,
            provider.name,
            output_dir,
            config.download_timeout,
        )
        .await
        {
            Ok(artifact) => artifact,
            Err(err) => {
                tracing::error!(error = %err, "Download failed");
                capture_diagnostic(session, &output_dir.join(ERROR_SCREENSHOT)).await;
                return Err(RunFailure::at(RunStage::Downloading)(err.into()));
            }
        };

        tracing::info!(stage = %RunStage::Archiving, "Archiving invoice");
        let archive = self.archive(config, &artifact).await;

        tracing::info!(stage = %RunStage::Done, path = %artifact.path.display(), "Run complete");
        Ok(RunOutcome {
            period,
            artifact,
            archive,
        })
    }

    async fn archive(&self, config: &RunConfig, artifact: &DownloadedArtifact) -> ArchiveOutcome {
        let target = config.bucket.as_ref().map(|bucket| ArchiveTarget {
            bucket: bucket.clone(),
            key_prefix: config.key_prefix.clone(),
        });

        match (&target, self.context.object_store.as_deref()) {
            (Some(_), Some(store)) => {
                archive(store, target.as_ref(), self.context.provider.name, artifact).await
            }
            (Some(target), None) => {
                tracing::warn!(bucket = %target.bucket, "Bucket configured but no object store available");
                ArchiveOutcome::Failed {
                    error: "no object store configured".to_string(),
                }
            }
            (None, _) => ArchiveOutcome::Skipped,
        }
    }
}

/// Path of the screenshot a failed run leaves behind, if any.
pub fn diagnostic_path(failure: &RunFailure, output_dir: &Path) -> Option<std::path::PathBuf> {
    let name = match failure.stage {
        RunStage::Authenticating | RunStage::Downloading => ERROR_SCREENSHOT,
        RunStage::Locating => crate::locator::BILLING_PAGE_SCREENSHOT,
        _ => return None,
    };
    let path = output_dir.join(name);
    path.exists().then_some(path)
}
