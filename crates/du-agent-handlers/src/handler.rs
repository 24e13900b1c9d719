//! The content handler contract.
//!
//! Every handler, leaf or composite, implements the same seven operations
//! over a [`Workflow`] node. Results are reported through the return value
//! and recorded on the node; handlers never panic on bad input, but the
//! composites still guard every call into a child handler so that a
//! misbehaving extension cannot take the agent down.

use std::panic::{catch_unwind, AssertUnwindSafe};

use du_agent_core::{AducResult, ResultCode};
use du_agent_workflow::Workflow;

use crate::registry::ExtensionManager;

/// A handler for one update type.
///
/// The registry is passed into every call so that composite handlers can
/// resolve the handlers of their children, and leaves can reach the content
/// downloader.
pub trait ContentHandler: Send + Sync {
    /// Make sure every payload file of `workflow` is in its work folder with
    /// a valid hash. Safe to call again after an interruption.
    fn download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult;

    /// Snapshot the state that [`ContentHandler::restore`] would roll back to.
    fn backup(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::BackupSuccessUnsupported)
    }

    /// Perform the update.
    fn install(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult;

    /// Finalize an install.
    fn apply(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult;

    /// Ask in-flight work on `workflow` to stop at its next checkpoint.
    fn cancel(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult;

    /// Report whether the update described by `workflow` is on the device.
    /// Must not change the node beyond incidental caching.
    fn is_installed(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult;

    /// Roll back after a failed install or apply. Best effort.
    fn restore(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::RestoreSuccessUnsupported)
    }
}

/// Run a handler call, turning a panic into a failure carrying
/// `extended_code`.
pub fn guarded<F>(extended_code: i32, call: F) -> AducResult
where
    F: FnOnce() -> AducResult,
{
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        tracing::error!(erc = extended_code, "Handler panicked");
        AducResult::failure(extended_code)
    })
}

/// Ask `handler` whether `workflow` is installed. A handler that panics is
/// treated as reporting not installed, so the work is attempted.
pub fn check_installed(
    handler: &dyn ContentHandler,
    extensions: &ExtensionManager,
    workflow: &mut Workflow,
) -> AducResult {
    catch_unwind(AssertUnwindSafe(|| handler.is_installed(extensions, workflow))).unwrap_or_else(
        |_| {
            tracing::warn!("IsInstalled panicked, assuming not installed");
            AducResult::from_code(ResultCode::IsInstalledNotInstalled)
        },
    )
}

/// Returns true if `result` reports the content as installed.
#[must_use]
pub fn reports_installed(result: AducResult) -> bool {
    result.code == ResultCode::IsInstalledInstalled
}

/// Check the cancel flag at the start of a phase.
///
/// Records and returns the cancelled result when cancellation was requested.
pub fn check_cancelled(workflow: &mut Workflow, phase: &str) -> Option<AducResult> {
    if !workflow.is_cancel_requested() {
        return None;
    }
    tracing::info!(
        workflow_id = %workflow.id(),
        level = workflow.level(),
        phase,
        "Cancelled"
    );
    let result = AducResult::cancelled();
    workflow.record(result, du_agent_core::UpdateState::Failed);
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_passes_results_through() {
        let result = guarded(7, || AducResult::from_code(ResultCode::InstallSuccess));
        assert_eq!(result.code, ResultCode::InstallSuccess);
    }

    #[test]
    fn guarded_converts_panics() {
        let result = guarded(42, || panic!("extension blew up"));
        assert_eq!(result, AducResult::failure(42));
    }
}
