//! Plumbing shared by the composite handlers.
//!
//! A composite drives each of its children through a phase, then folds the
//! child's outcome back into its own node: interrupts are merged, and on a
//! stop the child's diagnostics become the parent's.

use std::sync::Arc;

use du_agent_core::{AducResult, ResultCode};
use du_agent_workflow::{sandbox, Interrupts, Workflow};

use crate::handler::{guarded, check_installed, reports_installed, ContentHandler};
use crate::registry::ExtensionManager;
use crate::translate::{translate, Disposition};

/// Extended codes reported when a child handler panics in a phase. A
/// composite without a backup code does not call Backup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PanicCodes {
    pub backup: Option<i32>,
    pub install: i32,
    pub apply: i32,
}

/// What a child's phase means for its parent's loop.
#[derive(Debug)]
pub(crate) enum ChildOutcome {
    /// Go on with the next child.
    Continue(Interrupts),
    /// Stop the loop and surface `result`.
    Stop {
        result: AducResult,
        interrupts: Interrupts,
        details: String,
    },
}

impl ChildOutcome {
    fn stop(result: AducResult, interrupts: Interrupts, child: &Workflow) -> Self {
        Self::Stop {
            result,
            interrupts,
            details: child.result_details().to_string(),
        }
    }

    /// Fold the outcome into `parent`. Returns the result to surface if the
    /// parent must stop.
    pub fn settle(self, parent: &mut Workflow) -> Option<AducResult> {
        match self {
            Self::Continue(interrupts) => {
                parent.merge_interrupts(interrupts);
                None
            }
            Self::Stop {
                result,
                interrupts,
                details,
            } => {
                parent.merge_interrupts(interrupts);
                if !details.is_empty() {
                    parent.set_result_details(details);
                }
                Some(result)
            }
        }
    }
}

/// Make sure the node's work folder exists.
pub(crate) fn ensure_sandbox(workflow: &mut Workflow, extended_code: i32) -> Option<AducResult> {
    match sandbox::ensure(workflow.work_folder()) {
        Ok(()) => None,
        Err(e) => {
            tracing::error!(workflow_id = %workflow.id(), error = %e, "Cannot create work folder");
            workflow.set_result_details(format!("Cannot create work folder: {e}"));
            Some(AducResult::failure(extended_code))
        }
    }
}

/// Resolve the handler of child `index`. On failure the child is marked
/// failed and the parent carries the reason.
pub(crate) fn load_child_handler(
    extensions: &ExtensionManager,
    workflow: &mut Workflow,
    index: usize,
    update_type: &str,
) -> std::result::Result<Arc<dyn ContentHandler>, AducResult> {
    extensions.load_handler(update_type).map_err(|e| {
        let result = AducResult::failure(e.extended_code());
        if let Some(child) = workflow.child_mut(index) {
            child.set_result(result);
        }
        workflow.set_result_details(format!(
            "Cannot load handler '{update_type}' for child #{index}: {e}"
        ));
        result
    })
}

/// Download a child unless it reports itself installed.
pub(crate) fn download_child(
    handler: &dyn ContentHandler,
    extensions: &ExtensionManager,
    child: &mut Workflow,
    panic_code: i32,
) -> ChildOutcome {
    if reports_installed(check_installed(handler, extensions, child)) {
        tracing::info!(workflow_id = %child.id(), "Already installed, skipping download");
        child.set_result(AducResult::from_code(
            ResultCode::DownloadSkippedUpdateAlreadyInstalled,
        ));
        return ChildOutcome::Continue(Interrupts::default());
    }

    let result = guarded(panic_code, || handler.download(extensions, child));
    if result.is_failure() {
        tracing::warn!(workflow_id = %child.id(), result = %result, "Child download failed");
        return ChildOutcome::stop(result, Interrupts::default(), child);
    }
    ChildOutcome::Continue(Interrupts::default())
}

/// Take a child through Backup, Install and Apply unless it reports itself
/// installed. A failed Install or Apply is followed by a best-effort Restore.
pub(crate) fn install_child(
    handler: &dyn ContentHandler,
    extensions: &ExtensionManager,
    child: &mut Workflow,
    codes: PanicCodes,
) -> ChildOutcome {
    if reports_installed(check_installed(handler, extensions, child)) {
        tracing::info!(workflow_id = %child.id(), "Already installed, skipping install");
        child.set_result(AducResult::from_code(
            ResultCode::InstallSkippedUpdateAlreadyInstalled,
        ));
        return ChildOutcome::Continue(Interrupts::default());
    }

    if let Some(panic_code) = codes.backup {
        let backup = guarded(panic_code, || handler.backup(extensions, child));
        if backup.is_failure() {
            tracing::warn!(workflow_id = %child.id(), result = %backup, "Child backup failed");
            return ChildOutcome::stop(backup, Interrupts::default(), child);
        }
    }

    let install = guarded(codes.install, || handler.install(extensions, child));
    if install.is_failure() {
        tracing::warn!(workflow_id = %child.id(), result = %install, "Child install failed");
        restore_best_effort(handler, extensions, child);
        return ChildOutcome::stop(install, Interrupts::default(), child);
    }

    let installed = translate(install, child.interrupts());
    match installed.disposition {
        Disposition::Abort => {
            return ChildOutcome::stop(installed.result, installed.interrupts, child);
        }
        Disposition::NextSibling => return ChildOutcome::Continue(installed.interrupts),
        Disposition::Proceed => {}
    }

    let apply = guarded(codes.apply, || handler.apply(extensions, child));
    if apply.is_failure() {
        tracing::warn!(workflow_id = %child.id(), result = %apply, "Child apply failed");
        restore_best_effort(handler, extensions, child);
        return ChildOutcome::stop(apply, installed.interrupts, child);
    }

    let applied = translate(apply, child.interrupts());
    let interrupts = installed.interrupts.merge(applied.interrupts);
    if applied.aborts() {
        return ChildOutcome::stop(applied.result, interrupts, child);
    }
    ChildOutcome::Continue(interrupts)
}

fn restore_best_effort(
    handler: &dyn ContentHandler,
    extensions: &ExtensionManager,
    child: &mut Workflow,
) {
    let restored = guarded(0, || handler.restore(extensions, child));
    if restored.is_failure() {
        tracing::warn!(workflow_id = %child.id(), result = %restored, "Restore failed");
    } else {
        tracing::info!(workflow_id = %child.id(), result = %restored, "Restored");
    }
}
