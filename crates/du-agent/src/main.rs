//! Device update agent daemon.
//!
//! Reads update action documents, one JSON document per line, from standard
//! input and processes them. With `--action-file` it processes a single
//! action and exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use du_agent::{
    setup, AgentConfig, Driver, LauncherSystemActions, NoopSystemActions, SystemActions,
    TracingReporter,
};
use du_agent_handlers::{CommandLauncher, ProcessLauncher};
use du_agent_store::{InstalledCriteriaStore, JsonFileStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Device update agent.
#[derive(Parser, Debug)]
#[command(name = "du-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON).
    #[arg(long, env = "DU_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Process this update action and exit.
    #[arg(long)]
    action_file: Option<PathBuf>,

    /// Simulate leaf update types instead of changing the device.
    #[arg(long, default_value = "false")]
    simulate: bool,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::from_env(),
    };
    if args.simulate {
        config.simulate = true;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        simulate = config.simulate,
        "Starting device update agent"
    );

    let store: Arc<dyn InstalledCriteriaStore> =
        Arc::new(JsonFileStore::new(config.installed_criteria_file.clone()));
    let launcher: Arc<dyn CommandLauncher> =
        Arc::new(ProcessLauncher::new(config.launcher_path.clone()));
    let extensions = setup::build_extensions(&config, &store, &launcher, Handle::current())?;

    let restart = Arc::new(Notify::new());
    let system: Arc<dyn SystemActions> = if config.simulate {
        Arc::new(NoopSystemActions)
    } else {
        Arc::new(LauncherSystemActions::new(launcher, Arc::clone(&restart)))
    };
    let driver = Arc::new(Driver::new(
        Arc::new(extensions),
        system,
        Arc::new(TracingReporter),
        config,
    ));

    if let Some(path) = args.action_file {
        let json = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("cannot read action file {}", path.display()))?;
        let outcome = driver.run_deployment(&json).await?;
        tracing::info!(?outcome, "Deployment processed");
        driver.shutdown();
        return Ok(());
    }

    serve(driver, restart).await
}

/// Process actions from stdin until input closes, a restart is requested or
/// the process is interrupted.
async fn serve(driver: Arc<Driver>, restart: Arc<Notify>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("Input closed, waiting for running deployments");
                    while running.join_next().await.is_some() {}
                    break;
                };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let driver = Arc::clone(&driver);
                running.spawn(async move {
                    match driver.run_deployment(&line).await {
                        Ok(outcome) => tracing::info!(?outcome, "Action processed"),
                        Err(e) => tracing::error!(
                            error = %e,
                            erc = format!("0x{:08X}", e.extended_code()),
                            "Action failed"
                        ),
                    }
                });
            }
            () = restart.notified() => {
                tracing::warn!("Agent restart requested, exiting");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    driver.shutdown();
    Ok(())
}
