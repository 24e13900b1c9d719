//! Error types for the launcher.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for an update type or action the launcher does not handle.
pub const EXIT_UNSUPPORTED: u8 = 3;

/// Exit code for a task that could not be started.
pub const EXIT_FAILURE: u8 = 1;

/// Errors raised before or while launching a task.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The update type has no task table.
    #[error("unsupported update type: {0}")]
    UnsupportedType(String),

    /// The action is not known at all.
    #[error("unknown update action: {0}")]
    UnknownAction(String),

    /// The update type does not implement the action.
    #[error("{update_type} does not support the {action} action")]
    UnsupportedAction {
        /// Requested update type.
        update_type: String,
        /// Requested action.
        action: String,
    },

    /// The action needs `--target-data`.
    #[error("{0} requires --target-data")]
    MissingTargetData(String),

    /// No packages were named for an apt action.
    #[error("no packages specified in {0:?}")]
    NoPackages(String),

    /// An apt package manifest could not be read.
    #[error("cannot read package list {path}: {reason}")]
    PackageList {
        /// Manifest path.
        path: PathBuf,
        /// Read or parse failure.
        reason: String,
    },

    /// The child process could not be spawned.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ShellError {
    /// Process exit code reported for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::UnsupportedType(_) | Self::UnknownAction(_) | Self::UnsupportedAction { .. } => {
                EXIT_UNSUPPORTED
            }
            _ => EXIT_FAILURE,
        }
    }
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_requests_use_the_distinguished_code() {
        assert_eq!(ShellError::UnsupportedType("x/y".into()).exit_code(), 3);
        assert_eq!(ShellError::UnknownAction("dance".into()).exit_code(), 3);
        assert_eq!(ShellError::NoPackages(String::new()).exit_code(), 1);
    }
}
