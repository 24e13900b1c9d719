//! Privileged command launcher for the device update agent.
//!
//! The agent runs without privileges and hands device-changing work to this
//! binary:
//!
//! ```text
//! du-shell --update-type <type> --update-action <action> \
//!          [--target-data <data>] [--target-options <opt>]... \
//!          [--target-log-folder <dir>] [--log-level 0-3]
//! ```
//!
//! The child task's exit code becomes the launcher's exit code. An unknown
//! update type or action exits with code 3.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod process;
mod request;
mod tasks;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::ShellError;
use crate::request::LaunchRequest;

/// Device update privileged launcher.
#[derive(Parser, Debug)]
#[command(name = "du-shell")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Update type (`common`, `microsoft/apt`, `microsoft/script`, `microsoft/swupdate`).
    #[arg(long)]
    update_type: String,

    /// Action to run.
    #[arg(long)]
    update_action: String,

    /// Action payload: package list, script or image path.
    #[arg(long)]
    target_data: Option<String>,

    /// Option forwarded to the task (repeatable).
    #[arg(long, allow_hyphen_values = true)]
    target_options: Vec<String>,

    /// Folder for task logs.
    #[arg(long)]
    target_log_folder: Option<PathBuf>,

    /// Log level: 0 debug, 1 info, 2 warn, 3 error.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    log_level: u8,
}

const fn level_filter(level: u8) -> &'static str {
    match level {
        0 => "debug",
        1 => "info",
        2 => "warn",
        _ => "error",
    }
}

fn launch(args: Args) -> Result<u8, ShellError> {
    let request = LaunchRequest::parse(
        &args.update_type,
        &args.update_action,
        args.target_data,
        args.target_options,
        args.target_log_folder,
    )?;
    let invocation = tasks::plan(&request)?;
    process::run(&invocation)
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level_filter(args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        update_type = %args.update_type,
        action = %args.update_action,
        "du-shell invoked"
    );

    match launch(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "Launch failed");
            ExitCode::from(e.exit_code())
        }
    }
}
