//! The result vocabulary returned by every workflow operation.
//!
//! A result is a `(code, extended code)` pair. Success and failure are a
//! classification over the numeric code (`> 0` succeeds, `<= 0` fails), never a
//! stored flag. Several success codes carry a follow-up request for the caller,
//! e.g. [`ResultCode::InstallRequiredReboot`] or
//! [`ResultCode::InstallSkippedNoMatchingComponents`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A method-specific result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
#[repr(i32)]
pub enum ResultCode {
    /// Primary task failed because a cancel was requested.
    FailureCancelled = -1,
    /// General failure.
    Failure = 0,
    /// General success.
    Success = 1,

    /// Sandbox created.
    SandboxCreateSuccess = 300,
    /// Deployment acknowledged and in progress.
    DeploymentInProgressSuccess = 400,

    /// Download succeeded.
    DownloadSuccess = 500,
    /// Download started asynchronously.
    DownloadInProgress = 501,
    /// Download skipped; the file already exists and its hash is valid.
    DownloadSkippedFileExists = 502,
    /// Download skipped; the installed criteria is already met.
    DownloadSkippedUpdateAlreadyInstalled = 503,
    /// Download skipped; no component matched the update.
    DownloadSkippedNoMatchingComponents = 504,

    /// Install succeeded.
    InstallSuccess = 600,
    /// Install started asynchronously.
    InstallInProgress = 601,
    /// Install skipped; the installed criteria is already met.
    InstallSkippedUpdateAlreadyInstalled = 603,
    /// Install skipped; no component matched the update.
    InstallSkippedNoMatchingComponents = 604,
    /// Install succeeded; an immediate device reboot is required.
    InstallRequiredImmediateReboot = 605,
    /// Install succeeded; a deferred device reboot is required.
    InstallRequiredReboot = 606,
    /// Install succeeded; an immediate agent restart is required.
    InstallRequiredImmediateAgentRestart = 607,
    /// Install succeeded; a deferred agent restart is required.
    InstallRequiredAgentRestart = 608,

    /// Apply succeeded.
    ApplySuccess = 700,
    /// Apply started asynchronously.
    ApplyInProgress = 701,
    /// Apply succeeded; an immediate device reboot is required.
    ApplyRequiredImmediateReboot = 705,
    /// Apply succeeded; a deferred device reboot is required.
    ApplyRequiredReboot = 706,
    /// Apply succeeded; an immediate agent restart is required.
    ApplyRequiredImmediateAgentRestart = 707,
    /// Apply succeeded; a deferred agent restart is required.
    ApplyRequiredAgentRestart = 708,

    /// Cancel request accepted.
    CancelSuccess = 800,
    /// Cancel is best effort; the handler could not cancel.
    CancelUnableToCancel = 801,

    /// The content is installed.
    IsInstalledInstalled = 900,
    /// The content is not installed.
    IsInstalledNotInstalled = 901,

    /// Backup succeeded.
    BackupSuccess = 1000,
    /// Backup is not supported by the handler; the workflow may proceed.
    BackupSuccessUnsupported = 1001,
    /// Backup started asynchronously.
    BackupInProgress = 1002,

    /// Restore succeeded.
    RestoreSuccess = 1100,
    /// Restore is not supported by the handler.
    RestoreSuccessUnsupported = 1101,
    /// Restore started asynchronously.
    RestoreInProgress = 1102,
    /// Restore succeeded; an immediate device reboot is required.
    RestoreRequiredImmediateReboot = 1105,
    /// Restore succeeded; a deferred device reboot is required.
    RestoreRequiredReboot = 1106,
    /// Restore succeeded; an immediate agent restart is required.
    RestoreRequiredImmediateAgentRestart = 1107,
    /// Restore succeeded; a deferred agent restart is required.
    RestoreRequiredAgentRestart = 1108,
}

impl ResultCode {
    /// Convert the code to its numeric representation.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Try to convert a numeric value to a `ResultCode`.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        let code = match value {
            -1 => Self::FailureCancelled,
            0 => Self::Failure,
            1 => Self::Success,
            300 => Self::SandboxCreateSuccess,
            400 => Self::DeploymentInProgressSuccess,
            500 => Self::DownloadSuccess,
            501 => Self::DownloadInProgress,
            502 => Self::DownloadSkippedFileExists,
            503 => Self::DownloadSkippedUpdateAlreadyInstalled,
            504 => Self::DownloadSkippedNoMatchingComponents,
            600 => Self::InstallSuccess,
            601 => Self::InstallInProgress,
            603 => Self::InstallSkippedUpdateAlreadyInstalled,
            604 => Self::InstallSkippedNoMatchingComponents,
            605 => Self::InstallRequiredImmediateReboot,
            606 => Self::InstallRequiredReboot,
            607 => Self::InstallRequiredImmediateAgentRestart,
            608 => Self::InstallRequiredAgentRestart,
            700 => Self::ApplySuccess,
            701 => Self::ApplyInProgress,
            705 => Self::ApplyRequiredImmediateReboot,
            706 => Self::ApplyRequiredReboot,
            707 => Self::ApplyRequiredImmediateAgentRestart,
            708 => Self::ApplyRequiredAgentRestart,
            800 => Self::CancelSuccess,
            801 => Self::CancelUnableToCancel,
            900 => Self::IsInstalledInstalled,
            901 => Self::IsInstalledNotInstalled,
            1000 => Self::BackupSuccess,
            1001 => Self::BackupSuccessUnsupported,
            1002 => Self::BackupInProgress,
            1100 => Self::RestoreSuccess,
            1101 => Self::RestoreSuccessUnsupported,
            1102 => Self::RestoreInProgress,
            1105 => Self::RestoreRequiredImmediateReboot,
            1106 => Self::RestoreRequiredReboot,
            1107 => Self::RestoreRequiredImmediateAgentRestart,
            1108 => Self::RestoreRequiredAgentRestart,
            _ => return None,
        };
        Some(code)
    }

    /// Returns true if the code denotes success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.as_i32() > 0
    }

    /// Returns true if the code denotes failure (including cancellation).
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.as_i32() <= 0
    }

    /// Returns true for the "skipped" success codes of any phase.
    #[must_use]
    pub const fn is_skipped(self) -> bool {
        matches!(
            self,
            Self::DownloadSkippedFileExists
                | Self::DownloadSkippedUpdateAlreadyInstalled
                | Self::DownloadSkippedNoMatchingComponents
                | Self::InstallSkippedUpdateAlreadyInstalled
                | Self::InstallSkippedNoMatchingComponents
        )
    }
}

impl From<ResultCode> for i32 {
    fn from(code: ResultCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = CoreError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_i32(value).ok_or(CoreError::UnknownResultCode(value))
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.as_i32())
    }
}

/// The outcome of a workflow operation.
///
/// `extended_code` is only meaningful when `code` denotes failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AducResult {
    /// Method-specific result.
    #[serde(rename = "resultCode")]
    pub code: ResultCode,
    /// Implementation-specific extended result code.
    #[serde(rename = "extendedResultCode")]
    pub extended_code: i32,
}

impl AducResult {
    /// Create a result from a code and an extended code.
    #[must_use]
    pub const fn new(code: ResultCode, extended_code: i32) -> Self {
        Self {
            code,
            extended_code,
        }
    }

    /// Create a result with no extended code.
    #[must_use]
    pub const fn from_code(code: ResultCode) -> Self {
        Self::new(code, 0)
    }

    /// Create a general failure carrying `extended_code`.
    #[must_use]
    pub const fn failure(extended_code: i32) -> Self {
        Self::new(ResultCode::Failure, extended_code)
    }

    /// The result of an operation that observed a cancel request.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::from_code(ResultCode::FailureCancelled)
    }

    /// Returns true if the code denotes success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if the code denotes failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.code.is_failure()
    }
}

impl Default for AducResult {
    fn default() -> Self {
        Self::failure(0)
    }
}

impl From<ResultCode> for AducResult {
    fn from(code: ResultCode) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for AducResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (erc 0x{:08X})", self.code, self.extended_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_sign() {
        assert!(ResultCode::Failure.is_failure());
        assert!(ResultCode::FailureCancelled.is_failure());
        assert!(ResultCode::Success.is_success());
        assert!(ResultCode::InstallRequiredImmediateReboot.is_success());
        assert!(ResultCode::InstallSkippedNoMatchingComponents.is_success());
        assert!(ResultCode::CancelUnableToCancel.is_success());
    }

    #[test]
    fn numeric_round_trip_covers_known_codes() {
        for value in [-1, 0, 1, 504, 605, 708, 801, 901, 1001, 1108] {
            let code = ResultCode::from_i32(value).unwrap();
            assert_eq!(code.as_i32(), value);
        }
        assert_eq!(ResultCode::from_i32(602), None);
        assert_eq!(
            ResultCode::try_from(42),
            Err(CoreError::UnknownResultCode(42))
        );
    }

    #[test]
    fn skipped_codes() {
        assert!(ResultCode::InstallSkippedUpdateAlreadyInstalled.is_skipped());
        assert!(ResultCode::DownloadSkippedNoMatchingComponents.is_skipped());
        assert!(!ResultCode::InstallSuccess.is_skipped());
        assert!(!ResultCode::InstallRequiredReboot.is_skipped());
    }

    #[test]
    fn result_serializes_with_wire_names() {
        let result = AducResult::new(ResultCode::Failure, 0x1234);
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["resultCode"], 0);
        assert_eq!(json["extendedResultCode"], 0x1234);

        let parsed: AducResult =
            serde_json::from_str(r#"{"resultCode":606,"extendedResultCode":0}"#).unwrap();
        assert_eq!(parsed.code, ResultCode::InstallRequiredReboot);
    }

    #[test]
    fn unknown_code_rejected_on_deserialize() {
        let parsed: Result<AducResult, _> =
            serde_json::from_str(r#"{"resultCode":12345,"extendedResultCode":0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn default_is_plain_failure() {
        let result = AducResult::default();
        assert_eq!(result.code, ResultCode::Failure);
        assert_eq!(result.extended_code, 0);
        assert!(AducResult::cancelled().is_failure());
    }
}
