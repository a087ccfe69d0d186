mod support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use invoice_archiver::archive::ArchiveOutcome;
use invoice_archiver::clock::FixedClock;
use invoice_archiver::config::{ConfigSources, RunConfig, ENV_EMAIL, ENV_PASSWORD};
use invoice_archiver::error::{AuthError, ConfigError, DownloadError, NotFoundError, RunError};
use invoice_archiver::period::BillingPeriod;
use invoice_archiver::runner::{diagnostic_path, InvoiceRunner, RunContext, RunStage};
use support::{
    candidate, fast_provider, MemoryObjectStore, ScriptedBrowser, ScriptedLauncher,
    StaticCredentialStore,
};
use tempfile::TempDir;

const DECEMBER_PDF: &[u8] = b"%PDF-1.4 december invoice";

fn december() -> BillingPeriod {
    BillingPeriod::new(2024, 12).unwrap()
}

fn config(dir: &Path) -> RunConfig {
    RunConfig {
        output_dir: dir.join("invoices"),
        period: Some(december()),
        login_timeout: Duration::from_millis(100),
        download_timeout: Duration::from_secs(1),
        ..RunConfig::default()
    }
}

fn env_credentials() -> ConfigSources {
    ConfigSources::from_pairs([(ENV_EMAIL, "alice@example.com"), (ENV_PASSWORD, "hunter2")])
}

fn billing_browser() -> ScriptedBrowser {
    ScriptedBrowser::new(&fast_provider())
        .with_candidates(vec![
            candidate(0, "Usage", ""),
            candidate(1, "January 2025 invoice", ""),
            candidate(2, "December 2024 invoice", ""),
            candidate(3, "November 2024 invoice", ""),
        ])
        .with_payload(1, b"%PDF-1.4 january invoice")
        .with_payload(2, DECEMBER_PDF)
}

fn runner(launcher: Arc<ScriptedLauncher>) -> InvoiceRunner {
    InvoiceRunner::new(RunContext::new(launcher).with_provider(fast_provider()))
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn full_run_saves_exactly_one_pdf_for_the_period() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = billing_browser();
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let config = config(dir.path());

    let outcome = runner(launcher.clone())
        .run(&config, &env_credentials())
        .await?;

    assert_eq!(outcome.period, december());
    assert_eq!(outcome.archive, ArchiveOutcome::Skipped);
    assert_eq!(
        outcome.artifact.path,
        config.output_dir.join("openai_invoice_202412.pdf")
    );
    assert_eq!(files_in(&config.output_dir), vec!["openai_invoice_202412.pdf"]);
    assert_eq!(std::fs::read(&outcome.artifact.path)?, DECEMBER_PDF);

    assert_eq!(launcher.launches(), 1);
    assert!(browser.closed());
    assert!(browser.screenshots().is_empty());
    assert_eq!(
        browser.visited(),
        vec![
            "https://platform.openai.com/login".to_string(),
            "https://platform.openai.com/settings/organization/billing/history".to_string(),
        ]
    );
    let filled: Vec<String> = browser.fills().into_iter().map(|(_, v)| v).collect();
    assert_eq!(filled, vec!["alice@example.com", "hunter2"]);
    Ok(())
}

#[tokio::test]
async fn missing_credentials_fail_before_the_browser_starts() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = Arc::new(ScriptedLauncher::new(billing_browser()));

    let failure = runner(launcher.clone())
        .run(&config(dir.path()), &ConfigSources::from_pairs([(ENV_EMAIL, "alice@example.com")]))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Configuring);
    assert_eq!(failure.exit_code(), 2);
    assert!(matches!(
        failure.error,
        RunError::Config(ConfigError::MissingCredential {
            env_var: "OPENAI_PASSWORD",
            ..
        })
    ));
    assert_eq!(launcher.launches(), 0);
    Ok(())
}

#[tokio::test]
async fn secret_store_fills_in_missing_credentials() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = billing_browser();
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let store = StaticCredentialStore::new([("email", "store@example.com"), ("password", "s3cret")]);
    let runner = InvoiceRunner::new(
        RunContext::new(launcher)
            .with_provider(fast_provider())
            .with_credential_store(Arc::new(store)),
    );

    runner
        .run(&config(dir.path()), &ConfigSources::default())
        .await?;

    let filled: Vec<String> = browser.fills().into_iter().map(|(_, v)| v).collect();
    assert_eq!(filled, vec!["store@example.com", "s3cret"]);
    Ok(())
}

#[tokio::test]
async fn no_matching_invoice_leaves_billing_page_screenshot() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = ScriptedBrowser::new(&fast_provider())
        .with_candidates(vec![candidate(0, "PDF", "Nov 1, 2024  $18.00  Paid")]);
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let config = config(dir.path());

    let failure = runner(launcher)
        .run(&config, &env_credentials())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Locating);
    assert_eq!(failure.exit_code(), 4);
    assert!(matches!(
        failure.error,
        RunError::NotFound(NotFoundError::NoMatch { inspected: 1, .. })
    ));
    assert!(config.output_dir.join("billing_page.png").exists());
    assert!(!config.output_dir.join("openai_invoice_202412.pdf").exists());
    assert!(browser.closed());
    Ok(())
}

#[tokio::test]
async fn login_timeout_leaves_error_screenshot() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = billing_browser().with_redirect(None);
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let config = config(dir.path());

    let failure = runner(launcher)
        .run(&config, &env_credentials())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Authenticating);
    assert_eq!(failure.exit_code(), 3);
    match &failure.error {
        RunError::Auth(AuthError::Timeout { url, .. }) => {
            assert_eq!(url.as_deref(), Some("https://platform.openai.com/login"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(config.output_dir.join("error_screenshot.png").exists());
    assert_eq!(browser.visited().len(), 1, "billing page must not be visited");
    assert!(browser.closed());
    Ok(())
}

#[tokio::test]
async fn verification_challenge_stops_login() -> Result<()> {
    let dir = TempDir::new()?;
    let browser =
        billing_browser().with_redirect(Some("https://auth.openai.com/email-verification"));
    let launcher = Arc::new(ScriptedLauncher::new(browser));

    let failure = runner(launcher)
        .run(&config(dir.path()), &env_credentials())
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        RunError::Auth(AuthError::ChallengeDetected { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn failed_download_is_reported_with_screenshot() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = ScriptedBrowser::new(&fast_provider())
        .with_candidates(vec![candidate(0, "December 2024 invoice", "")]);
    let launcher = Arc::new(ScriptedLauncher::new(browser));
    let config = config(dir.path());

    let failure = runner(launcher)
        .run(&config, &env_credentials())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Downloading);
    assert_eq!(failure.exit_code(), 5);
    assert!(matches!(
        failure.error,
        RunError::Download(DownloadError::Retrieve(_))
    ));
    assert_eq!(
        diagnostic_path(&failure, &config.output_dir),
        Some(config.output_dir.join("error_screenshot.png"))
    );
    Ok(())
}

#[tokio::test]
async fn html_instead_of_pdf_fails_the_download() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = ScriptedBrowser::new(&fast_provider())
        .with_candidates(vec![candidate(0, "December 2024 invoice", "")])
        .with_payload(0, b"<!DOCTYPE html><html><body>Sign in to continue</body></html>");
    let launcher = Arc::new(ScriptedLauncher::new(browser));
    let config = config(dir.path());

    let failure = runner(launcher)
        .run(&config, &env_credentials())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Downloading);
    assert_eq!(failure.exit_code(), 5);
    assert!(matches!(
        failure.error,
        RunError::Download(DownloadError::NotPdf { .. })
    ));
    assert!(!config.output_dir.join("openai_invoice_202412.pdf").exists());
    Ok(())
}

#[tokio::test]
async fn landing_page_login_reaches_email_form() -> Result<()> {
    let dir = TempDir::new()?;
    let provider = fast_provider();
    let browser = billing_browser().with_landing_page(&provider);
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));

    runner(launcher)
        .run(&config(dir.path()), &env_credentials())
        .await?;

    let clicks = browser.clicks();
    assert_eq!(clicks[0], provider.landing_login[0]);
    assert_eq!(clicks[1], provider.continue_with_email[0]);
    let filled: Vec<String> = browser.fills().into_iter().map(|(_, v)| v).collect();
    assert_eq!(filled, vec!["alice@example.com", "hunter2"]);
    Ok(())
}

#[tokio::test]
async fn one_time_code_prompt_stops_login_without_waiting() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = billing_browser().with_code_prompt(&fast_provider());
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let config = RunConfig {
        login_timeout: Duration::from_secs(30),
        ..config(dir.path())
    };

    let started = std::time::Instant::now();
    let failure = runner(launcher)
        .run(&config, &env_credentials())
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    match &failure.error {
        RunError::Auth(AuthError::ChallengeDetected { url }) => {
            assert_eq!(url, "https://platform.openai.com/login");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(browser.visited().len(), 1);
    Ok(())
}

#[tokio::test]
async fn screenshot_failure_keeps_the_original_error() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = billing_browser()
        .with_redirect(None)
        .with_failing_screenshots();
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let config = config(dir.path());

    let failure = runner(launcher)
        .run(&config, &env_credentials())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Authenticating);
    assert!(matches!(
        failure.error,
        RunError::Auth(AuthError::Timeout { .. })
    ));
    assert!(!config.output_dir.join("error_screenshot.png").exists());
    assert_eq!(diagnostic_path(&failure, &config.output_dir), None);
    assert!(browser.closed());
    Ok(())
}

#[tokio::test]
async fn browser_launch_failure_exits_with_generic_code() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = Arc::new(ScriptedLauncher::failing());

    let failure = runner(launcher.clone())
        .run(&config(dir.path()), &env_credentials())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Authenticating);
    assert!(matches!(failure.error, RunError::Launch(_)));
    assert_eq!(failure.exit_code(), 1);
    assert_eq!(launcher.launches(), 1);
    Ok(())
}

#[tokio::test]
async fn upload_failure_still_succeeds_with_local_pdf() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = Arc::new(ScriptedLauncher::new(billing_browser()));
    let store = Arc::new(MemoryObjectStore::failing());
    let config = RunConfig {
        bucket: Some("invoices".to_string()),
        ..config(dir.path())
    };
    let runner = InvoiceRunner::new(
        RunContext::new(launcher)
            .with_provider(fast_provider())
            .with_object_store(store.clone()),
    );

    let outcome = runner.run(&config, &env_credentials()).await?;

    assert!(outcome.archive.is_failed());
    assert!(outcome.artifact.path.exists());
    assert!(store.objects().is_empty());
    Ok(())
}

#[tokio::test]
async fn bucket_without_object_store_is_an_archive_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = Arc::new(ScriptedLauncher::new(billing_browser()));
    let config = RunConfig {
        bucket: Some("invoices".to_string()),
        ..config(dir.path())
    };

    let outcome = runner(launcher).run(&config, &env_credentials()).await?;
    assert!(outcome.archive.is_failed());
    Ok(())
}

#[tokio::test]
async fn second_run_for_same_period_overwrites_the_file() -> Result<()> {
    let dir = TempDir::new()?;
    let browser = billing_browser();
    let launcher = Arc::new(ScriptedLauncher::new(browser.clone()));
    let config = config(dir.path());
    let runner = runner(launcher.clone());

    runner.run(&config, &env_credentials()).await?;
    browser.set_payload(2, b"%PDF-1.4 reissued december invoice");
    let outcome = runner.run(&config, &env_credentials()).await?;

    assert_eq!(launcher.launches(), 2);
    assert_eq!(files_in(&config.output_dir), vec!["openai_invoice_202412.pdf"]);
    assert_eq!(
        std::fs::read(&outcome.artifact.path)?,
        b"%PDF-1.4 reissued december invoice"
    );
    Ok(())
}

#[tokio::test]
async fn previous_month_is_archived_under_service_key() -> Result<()> {
    let dir = TempDir::new()?;
    let launcher = Arc::new(ScriptedLauncher::new(billing_browser()));
    let store = Arc::new(MemoryObjectStore::new());
    let today = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let config = RunConfig {
        period: None,
        bucket: Some("invoices".to_string()),
        ..config(dir.path())
    };
    let runner = InvoiceRunner::new(
        RunContext::new(launcher)
            .with_provider(fast_provider())
            .with_clock(Arc::new(FixedClock::new(today)))
            .with_object_store(store.clone()),
    );

    let outcome = runner.run(&config, &env_credentials()).await?;

    assert_eq!(outcome.period, december());
    assert_eq!(
        outcome.artifact.path.file_name().and_then(|n| n.to_str()),
        Some("openai_invoice_202412.pdf")
    );
    assert_eq!(
        outcome.archive,
        ArchiveOutcome::Uploaded {
            uri: "s3://invoices/openai/202412.pdf".to_string()
        }
    );

    let objects = store.objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].bucket, "invoices");
    assert_eq!(objects[0].key, "openai/202412.pdf");
    assert_eq!(objects[0].content_type, "application/pdf");
    assert_eq!(objects[0].body, DECEMBER_PDF);
    Ok(())
}
