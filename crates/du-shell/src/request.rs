//! Launch request vocabulary: update types and actions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ShellError;

/// Update types with a task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellUpdateType {
    /// Device-level actions such as reboot.
    Common,
    /// Debian packages through `apt-get`.
    Apt,
    /// A script shipped with the update.
    Script,
    /// A SWUpdate image.
    SwUpdate,
}

impl ShellUpdateType {
    /// Name as passed on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Apt => "microsoft/apt",
            Self::Script => "microsoft/script",
            Self::SwUpdate => "microsoft/swupdate",
        }
    }
}

impl fmt::Display for ShellUpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellUpdateType {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Versioned names ("microsoft/apt:1") select the same table.
        let name = s.split(':').next().unwrap_or(s);
        match name {
            "common" => Ok(Self::Common),
            "microsoft/apt" => Ok(Self::Apt),
            "microsoft/script" => Ok(Self::Script),
            "microsoft/swupdate" => Ok(Self::SwUpdate),
            _ => Err(ShellError::UnsupportedType(s.to_string())),
        }
    }
}

/// Actions the launcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellAction {
    /// Prepare the package source.
    Initialize,
    /// Fetch content without installing it.
    Download,
    /// Install content.
    Install,
    /// Remove content.
    Remove,
    /// Activate installed content.
    Apply,
    /// Abort an in-flight operation.
    Cancel,
    /// Revert to the previous content.
    Rollback,
    /// Reboot the device.
    Reboot,
    /// Query the current status.
    GetStatus,
    /// Run a script.
    Execute,
}

impl ShellAction {
    /// Name as passed on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Download => "download",
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Apply => "apply",
            Self::Cancel => "cancel",
            Self::Rollback => "rollback",
            Self::Reboot => "reboot",
            Self::GetStatus => "getstatus",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for ShellAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellAction {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(Self::Initialize),
            "download" => Ok(Self::Download),
            "install" => Ok(Self::Install),
            "remove" => Ok(Self::Remove),
            "apply" => Ok(Self::Apply),
            "cancel" => Ok(Self::Cancel),
            "rollback" => Ok(Self::Rollback),
            "reboot" => Ok(Self::Reboot),
            "getstatus" => Ok(Self::GetStatus),
            "execute" => Ok(Self::Execute),
            _ => Err(ShellError::UnknownAction(s.to_string())),
        }
    }
}

/// A parsed launch request.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Task table to use.
    pub update_type: ShellUpdateType,
    /// Action to run.
    pub action: ShellAction,
    /// Action payload: package list, script path or image path.
    pub target_data: Option<String>,
    /// Extra options forwarded to the task.
    pub target_options: Vec<String>,
    /// Folder for task logs.
    pub log_folder: Option<PathBuf>,
}

impl LaunchRequest {
    /// Parse the raw type and action names.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-type or unknown-action error.
    pub fn parse(
        update_type: &str,
        action: &str,
        target_data: Option<String>,
        target_options: Vec<String>,
        log_folder: Option<PathBuf>,
    ) -> Result<Self, ShellError> {
        Ok(Self {
            update_type: update_type.parse()?,
            action: action.parse()?,
            target_data,
            target_options,
            log_folder,
        })
    }

    /// The target data, or an error naming the action.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::MissingTargetData` when absent or blank.
    pub fn require_target_data(&self) -> Result<&str, ShellError> {
        self.target_data
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ShellError::MissingTargetData(self.action.to_string()))
    }
}
