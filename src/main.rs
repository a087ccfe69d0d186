use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use invoice_archiver::archive::{ArchiveOutcome, S3ObjectStore};
use invoice_archiver::browser::{find_chrome, ChromeLauncher};
use invoice_archiver::config::{ConfigSources, RunConfig, ENV_EMAIL, ENV_PASSWORD};
use invoice_archiver::credentials::SecretsManagerStore;
use invoice_archiver::duration::format_duration;
use invoice_archiver::error::{ConfigError, RunError};
use invoice_archiver::period::BillingPeriod;
use invoice_archiver::provider::Provider;
use invoice_archiver::runner::{diagnostic_path, InvoiceRunner, RunContext, RunStage};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off";

#[derive(Parser)]
#[command(name = "invoice-archiver")]
#[command(about = "Download the monthly OpenAI invoice PDF and archive it to S3")]
struct Cli {
    /// Read settings from this .env file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Billing period to fetch (YYYY-MM). Defaults to the previous month.
    #[arg(long)]
    period: Option<BillingPeriod>,

    /// Directory for the invoice and diagnostic screenshots
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Keep the invoice local even if S3_BUCKET is set
    #[arg(long)]
    no_archive: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show resolved configuration (secrets are never printed)
    Config,
}

impl Cli {
    fn apply_overrides(&self, config: &mut RunConfig) {
        if let Some(period) = self.period {
            config.period = Some(period);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.headed {
            config.headless = false;
        }
        if self.no_archive {
            config.bucket = None;
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let sources = match ConfigSources::from_process(cli.env_file.as_deref()) {
        Ok(sources) => sources,
        Err(err) => return config_failure(err),
    };
    let mut config = match RunConfig::resolve(&sources) {
        Ok(config) => config,
        Err(err) => return config_failure(err),
    };
    cli.apply_overrides(&mut config);

    match cli.command {
        Some(Command::Config) => {
            print_config(&config, &sources);
            ExitCode::SUCCESS
        }
        None => run(&config, &sources).await,
    }
}

fn config_failure(err: ConfigError) -> ExitCode {
    eprintln!("Failed during {}: {err}", RunStage::Configuring);
    ExitCode::from(RunError::from(err).exit_code())
}

async fn run(config: &RunConfig, sources: &ConfigSources) -> ExitCode {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let mut context = RunContext::new(Arc::new(ChromeLauncher)).with_credential_store(Arc::new(
        SecretsManagerStore::new(&sdk_config, config.secret_name.clone()),
    ));
    if config.archiving_enabled() {
        context = context.with_object_store(Arc::new(S3ObjectStore::new(&sdk_config)));
    }
    let provider = context.provider.clone();
    let runner = InvoiceRunner::new(context);
    let period = runner.target_period(config);

    print_banner(&provider, config, period);

    match runner.run(config, sources).await {
        Ok(outcome) => {
            println!(
                "Saved {} ({} bytes)",
                outcome.artifact.path.display(),
                outcome.artifact.size
            );
            match &outcome.archive {
                ArchiveOutcome::Uploaded { uri } => println!("Archived to {uri}"),
                ArchiveOutcome::Skipped => println!("Archive skipped (no bucket configured)"),
                ArchiveOutcome::Failed { error } => {
                    println!("Archive failed, local copy kept: {error}")
                }
            }
            println!("Done");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("Failed during {}: {}", failure.stage, failure.error);
            if let Some(path) = diagnostic_path(&failure, &config.output_dir) {
                eprintln!("Screenshot: {}", path.display());
            }
            ExitCode::from(failure.exit_code())
        }
    }
}

fn print_banner(provider: &Provider, config: &RunConfig, period: BillingPeriod) {
    println!("{} Invoice Downloader", provider.display_name);
    println!("==========================\n");
    println!("Period: {} {}", period.month_name(), period.year());
    println!("Output: {}", config.output_dir.display());
    match &config.bucket {
        Some(bucket) => println!("Archive: s3://{bucket}/{}", config.key_prefix),
        None => println!("Archive: disabled"),
    }
    println!();
}

fn print_config(config: &RunConfig, sources: &ConfigSources) {
    match sources.env_file_path() {
        Some(path) => println!("Env file: {}", path.display()),
        None => println!("Env file: none"),
    }
    println!("Output directory: {}", config.output_dir.display());
    println!("Headless: {}", config.headless);
    match config.period {
        Some(period) => println!("Period: {period}"),
        None => println!("Period: previous month"),
    }
    match &config.bucket {
        Some(bucket) => println!("Bucket: {bucket} (prefix {:?})", config.key_prefix),
        None => println!("Bucket: none (archiving disabled)"),
    }
    println!("Secret: {} ({})", config.secret_name, config.region);
    println!("Login timeout: {}", format_duration(config.login_timeout));
    println!("Download timeout: {}", format_duration(config.download_timeout));
    match (&config.chrome_path, find_chrome()) {
        (Some(path), _) => println!("Chrome: {}", path.display()),
        (None, Some(found)) => println!("Chrome: {found} (auto-detected)"),
        (None, None) => println!("Chrome: not found"),
    }

    for var in [ENV_EMAIL, ENV_PASSWORD] {
        match sources.lookup(var) {
            Some((_, source)) => println!("{var}: set ({source})"),
            None => println!("{var}: not set (falls back to secret store)"),
        }
    }
}
