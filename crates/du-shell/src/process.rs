//! Child process execution.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Result, ShellError, EXIT_FAILURE};
use crate::tasks::Invocation;

/// Run `invocation`, log its output and return its exit code.
///
/// A child killed by a signal reports `EXIT_FAILURE`.
///
/// # Errors
///
/// Returns `ShellError::Launch` if the child cannot be started.
pub fn run(invocation: &Invocation) -> Result<u8> {
    if let Some(path) = &invocation.make_executable {
        make_executable(path).map_err(|source| launch_error(invocation, source))?;
    }

    tracing::info!(
        program = %invocation.program,
        args = ?invocation.args,
        "Launching child process"
    );

    let output = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| launch_error(invocation, source))?;

    tracing::info!("Begin child output");
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        tracing::info!(target: "child", "{line}");
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        tracing::warn!(target: "child", "{line}");
    }
    tracing::info!("End child output");

    let code = match output.status.code() {
        Some(code) => u8::try_from(code).unwrap_or(EXIT_FAILURE),
        None => {
            tracing::error!(program = %invocation.program, "Child terminated by a signal");
            EXIT_FAILURE
        }
    };
    tracing::info!(program = %invocation.program, code, "Child exited");
    Ok(code)
}

fn launch_error(invocation: &Invocation, source: std::io::Error) -> ShellError {
    ShellError::Launch {
        program: invocation.program.clone(),
        source,
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
