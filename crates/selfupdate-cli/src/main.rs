//! selfupdate - check for, install, and apply application updates
//!
//! ## Commands
//!
//! - `check`: run the full workflow (resolve, install, offer restart)
//! - `resolve`: resolve only and print the result as JSON
//! - `sources`: validate the configured repository locations

mod console;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, Level};

use selfupdate_core::{
    installed_version, Artifact, CheckStatus, CoordinatorError, JobContext, RemoteRepository,
    RepositorySource, ResolutionResult, UpdateConfig, UpdateCoordinator, UpdateResolver,
};

use crate::console::ConsoleSink;

#[derive(Parser)]
#[command(name = "selfupdate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Check for and install application updates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct Settings {
    /// JSON config file
    #[arg(long, global = true, env = "SELFUPDATE_CONFIG")]
    config: Option<PathBuf>,

    /// Repository location (repeatable); replaces configured repositories
    #[arg(short, long = "repository", global = true)]
    repositories: Vec<String>,

    /// Installation directory
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,

    /// Installed version (default: the recorded installed version)
    #[arg(long, global = true)]
    current_version: Option<String>,

    /// Consider pre-release versions
    #[arg(long, global = true)]
    prerelease: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check for updates, install the newest one, and offer a restart
    Check {
        /// Restart without asking once installed
        #[arg(short, long)]
        yes: bool,

        /// Command that starts the updated application
        #[arg(long)]
        restart_command: Option<String>,
    },

    /// Resolve available updates and print the result as JSON
    Resolve,

    /// Validate and list the configured repository locations
    Sources,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    selfupdate_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(&cli.settings, |key| std::env::var(key).ok()).await?;
    debug!(?config, "effective configuration");

    match cli.command {
        Commands::Check {
            yes,
            restart_command,
        } => cmd_check(config, ConsoleSink::new(yes, restart_command)).await,
        Commands::Resolve => cmd_resolve(&config).await,
        Commands::Sources => Ok(if cmd_sources(&config) == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
    }
}

/// Build the effective configuration: file, then environment, then flags.
async fn load_config<F>(settings: &Settings, env: F) -> Result<UpdateConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &settings.config {
        Some(path) => UpdateConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => UpdateConfig::new(selfupdate_core::VERSION),
    };
    config
        .apply_env(env)
        .context("Invalid selfupdate environment")?;

    if !settings.repositories.is_empty() {
        config.repositories = settings.repositories.clone();
    }
    if let Some(root) = &settings.install_root {
        config.install_root = root.clone();
    }
    if settings.prerelease {
        config.include_prerelease = true;
    }
    match &settings.current_version {
        Some(version) => config.current_version = version.clone(),
        None => {
            if let Some(version) = recorded_version(&config.install_root).await? {
                config.current_version = version;
            }
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn recorded_version(root: &Path) -> Result<Option<String>> {
    let version = installed_version(root)
        .await
        .with_context(|| format!("Failed to read installed version in {}", root.display()))?;
    Ok(version.map(|v| v.to_string()))
}

async fn cmd_check(config: UpdateConfig, sink: ConsoleSink) -> Result<ExitCode> {
    let coordinator = UpdateCoordinator::from_config(config, Arc::new(sink))
        .context("Failed to start update coordinator")?;

    let ticket = match coordinator.check_for_updates().await {
        Ok(ticket) => ticket,
        Err(CoordinatorError::CheckInProgress) => {
            eprintln!("An update check is already in progress.");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e).context("Failed to start update check"),
    };

    let canceller = ticket.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling update");
            canceller.cancel();
        }
    });

    let status = ticket.wait().await.context("Update check aborted")?;
    info!(status = %status, "Update check finished");
    Ok(ExitCode::from(status_code(status)))
}

/// Process exit code for a finished check.
fn status_code(status: CheckStatus) -> u8 {
    match status {
        CheckStatus::NoUpdateAvailable | CheckStatus::InstallSucceeded => 0,
        CheckStatus::ResolutionError | CheckStatus::InstallFailed => 1,
        CheckStatus::Cancelled => 2,
    }
}

#[derive(Debug, Serialize)]
struct ResolveOutput {
    current: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ResolveOutput {
    fn new(current: String, result: &ResolutionResult) -> Self {
        let mut out = Self {
            current,
            outcome: result.label(),
            target: None,
            source: None,
            artifacts: Vec::new(),
            notes: None,
            error: None,
        };
        match result {
            ResolutionResult::NoUpdateAvailable => {}
            ResolutionResult::UpdateFound(plan) => {
                out.target = Some(plan.target().to_string());
                out.source = Some(plan.source().to_string());
                out.artifacts = plan.artifacts().to_vec();
                out.notes = plan.notes().map(str::to_string);
            }
            ResolutionResult::ResolutionFailed(err) => out.error = Some(err.to_string()),
        }
        out
    }
}

async fn cmd_resolve(config: &UpdateConfig) -> Result<ExitCode> {
    let current = config.current_version()?;
    let locations = RepositorySource::from_config(config)
        .locations()
        .context("Invalid repository location")?;
    let client = Arc::new(RemoteRepository::new(config)?);
    let resolver = UpdateResolver::new(client).with_prerelease(config.include_prerelease);

    let result = resolver
        .resolve(&current, &locations, &JobContext::detached())
        .await;
    let output = ResolveOutput::new(current.to_string(), &result);
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(match result {
        ResolutionResult::ResolutionFailed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Print every configured location; returns how many are invalid.
fn cmd_sources(config: &UpdateConfig) -> usize {
    let source = RepositorySource::from_config(config);
    if source.is_empty() {
        println!("No repositories configured.");
        return 0;
    }

    let mut invalid = 0;
    for raw in source.raw() {
        match RepositorySource::validate(raw) {
            Ok(location) => println!("ok       {location}"),
            Err(e) => {
                invalid += 1;
                println!("invalid  {raw}  ({})", e.reason);
            }
        }
    }
    invalid
}
