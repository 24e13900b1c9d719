//! Task tables: map a launch request onto the child process to run.
//!
//! Building the invocation is kept separate from running it so each table
//! can be checked without touching the device.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ShellError};
use crate::request::{LaunchRequest, ShellAction, ShellUpdateType};

/// Package manager front end.
pub const APT_GET: &str = "apt-get";

/// System reboot command.
pub const REBOOT_COMMAND: &str = "/sbin/reboot";

/// SWUpdate wrapper script.
pub const SWUPDATE_COMMAND: &str = "/usr/lib/du-agent/du-swupdate.sh";

/// `apt-get` options callers may pass through `--target-options`.
const ALLOWED_DPKG_OPTIONS: [&str; 2] = [
    "Dpkg::Options::=--force-confdef",
    "Dpkg::Options::=--force-confold",
];

/// A child process to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program path or name.
    pub program: String,
    /// Arguments, without the program.
    pub args: Vec<String>,
    /// Make this file executable by owner and group before launching.
    pub make_executable: Option<PathBuf>,
}

impl Invocation {
    fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            make_executable: None,
        }
    }
}

/// Build the invocation for `request`.
///
/// # Errors
///
/// Returns `ShellError::UnsupportedAction` when the type's table has no entry
/// for the action, or a payload error when the target data is unusable.
pub fn plan(request: &LaunchRequest) -> Result<Invocation> {
    match request.update_type {
        ShellUpdateType::Common => common(request),
        ShellUpdateType::Apt => apt(request),
        ShellUpdateType::Script => script(request),
        ShellUpdateType::SwUpdate => swupdate(request),
    }
}

fn unsupported(request: &LaunchRequest) -> ShellError {
    ShellError::UnsupportedAction {
        update_type: request.update_type.to_string(),
        action: request.action.to_string(),
    }
}

fn reboot() -> Invocation {
    Invocation::new(REBOOT_COMMAND, ["--reboot", "--no-wall"])
}

// ============================================================================
// common
// ============================================================================

fn common(request: &LaunchRequest) -> Result<Invocation> {
    match request.action {
        ShellAction::Reboot => Ok(reboot()),
        _ => Err(unsupported(request)),
    }
}

// ============================================================================
// microsoft/apt
// ============================================================================

#[derive(Debug, Deserialize)]
struct AptManifest {
    packages: Vec<AptPackage>,
}

#[derive(Debug, Deserialize)]
struct AptPackage {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

fn apt(request: &LaunchRequest) -> Result<Invocation> {
    let verb = match request.action {
        ShellAction::Initialize => return Ok(Invocation::new(APT_GET, ["update"])),
        ShellAction::Download | ShellAction::Install => "install",
        ShellAction::Remove | ShellAction::Rollback => "remove",
        _ => return Err(unsupported(request)),
    };

    let mut args = vec!["-y".to_string(), "--allow-downgrades".to_string()];
    args.extend(apt_options(&request.target_options));
    if request.action == ShellAction::Download {
        args.push("--download-only".to_string());
    }
    args.push(verb.to_string());

    let packages = apt_packages(request.target_data.as_deref().unwrap_or_default())?;
    if packages.is_empty() {
        return Err(ShellError::NoPackages(
            request.target_data.clone().unwrap_or_default(),
        ));
    }
    args.extend(packages);

    Ok(Invocation::new(APT_GET, args))
}

/// Keep only `-o <allowed dpkg option>` pairs.
fn apt_options(options: &[String]) -> Vec<String> {
    let mut kept = Vec::new();
    let mut iter = options.iter().peekable();
    while let Some(option) = iter.next() {
        if option == "-o" {
            if let Some(value) = iter.next_if(|v| ALLOWED_DPKG_OPTIONS.contains(&v.as_str())) {
                kept.push(option.clone());
                kept.push(value.clone());
                continue;
            }
        }
        tracing::debug!(option = %option, "Ignoring apt option");
    }
    kept
}

/// Package arguments from the target data.
///
/// The target data is either a package manifest file (JSON with a
/// `packages` array, or a whitespace separated list) or an inline list.
fn apt_packages(target_data: &str) -> Result<Vec<String>> {
    let path = Path::new(target_data);
    if !path.is_file() {
        return Ok(split_packages(target_data));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ShellError::PackageList {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !content.trim_start().starts_with('{') {
        return Ok(split_packages(&content));
    }
    let manifest: AptManifest =
        serde_json::from_str(&content).map_err(|e| ShellError::PackageList {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(manifest
        .packages
        .into_iter()
        .map(|p| match p.version {
            Some(version) if !version.is_empty() => format!("{}={version}", p.name),
            _ => p.name,
        })
        .collect())
}

fn split_packages(list: &str) -> Vec<String> {
    list.split(|c: char| c.is_whitespace() || c == '"' || c == '\'')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// microsoft/script
// ============================================================================

fn script(request: &LaunchRequest) -> Result<Invocation> {
    let phase = match request.action {
        ShellAction::Execute => None,
        ShellAction::Install | ShellAction::Apply | ShellAction::Cancel => {
            Some(format!("--action-{}", request.action))
        }
        _ => return Err(unsupported(request)),
    };

    let program = request.require_target_data()?.to_string();
    let mut invocation = Invocation::new(program.clone(), request.target_options.iter().cloned());
    invocation.args.extend(phase);
    invocation.make_executable = Some(PathBuf::from(program));
    Ok(invocation)
}

// ============================================================================
// microsoft/swupdate
// ============================================================================

fn swupdate(request: &LaunchRequest) -> Result<Invocation> {
    match request.action {
        ShellAction::Install => {
            let image = request.require_target_data()?;
            let mut args = Vec::new();
            if let Some(folder) = &request.log_folder {
                args.push("-l".to_string());
                args.push(folder.display().to_string());
            }
            args.push("-i".to_string());
            args.push(image.to_string());
            Ok(Invocation::new(SWUPDATE_COMMAND, args))
        }
        ShellAction::Apply => Ok(Invocation::new(SWUPDATE_COMMAND, ["-a"])),
        ShellAction::Cancel | ShellAction::Rollback => {
            Ok(Invocation::new(SWUPDATE_COMMAND, ["-r"]))
        }
        ShellAction::Reboot => Ok(reboot()),
        _ => Err(unsupported(request)),
    }
}
