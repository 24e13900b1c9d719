//! Coarse lifecycle state of a workflow node.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle states reported for a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum UpdateState {
    /// No workflow data.
    None = -1,
    /// The start state, and the state reported after a successful deployment.
    #[default]
    Idle = 0,
    /// A download is in progress.
    DownloadStarted = 1,
    /// A download completed successfully.
    DownloadSucceeded = 2,
    /// An install is in progress.
    InstallStarted = 3,
    /// An install completed successfully.
    InstallSucceeded = 4,
    /// An apply is in progress.
    ApplyStarted = 5,
    /// The deployment was acknowledged.
    DeploymentInProgress = 6,
    /// A backup is in progress.
    BackupStarted = 7,
    /// A backup completed successfully.
    BackupSucceeded = 8,
    /// A restore is in progress.
    RestoreStarted = 9,
    /// The deployment failed.
    Failed = 255,
}

impl UpdateState {
    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Try to convert a numeric value to an `UpdateState`.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::None),
            0 => Some(Self::Idle),
            1 => Some(Self::DownloadStarted),
            2 => Some(Self::DownloadSucceeded),
            3 => Some(Self::InstallStarted),
            4 => Some(Self::InstallSucceeded),
            5 => Some(Self::ApplyStarted),
            6 => Some(Self::DeploymentInProgress),
            7 => Some(Self::BackupStarted),
            8 => Some(Self::BackupSucceeded),
            9 => Some(Self::RestoreStarted),
            255 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true for states that end a deployment attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

impl TryFrom<i32> for UpdateState {
    type Error = CoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value).ok_or(CoreError::UnknownState(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_match_reporting_contract() {
        assert_eq!(UpdateState::Idle.as_i32(), 0);
        assert_eq!(UpdateState::InstallSucceeded.as_i32(), 4);
        assert_eq!(UpdateState::Failed.as_i32(), 255);
        assert_eq!(UpdateState::from_i32(255), Some(UpdateState::Failed));
        assert_eq!(UpdateState::from_i32(42), None);
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&UpdateState::DownloadSucceeded).unwrap();
        assert_eq!(json, "\"download_succeeded\"");
    }

    #[test]
    fn terminal_states() {
        assert!(UpdateState::Idle.is_terminal());
        assert!(UpdateState::Failed.is_terminal());
        assert!(!UpdateState::InstallStarted.is_terminal());
    }
}
