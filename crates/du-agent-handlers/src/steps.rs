//! The multi-step composite handler.
//!
//! Each instruction step becomes a child node: inline steps are run by the
//! handler they name, reference steps are detached manifests run by another
//! instance of this handler one level down. Below the top level, a node
//! holds the components its compatibility selected, and every step runs once
//! per component with that component alone selected.

use du_agent_core::{erc, AducResult, ResultCode, UpdateState};
use du_agent_workflow::{Step, Workflow};
use serde_json::Value;

use crate::composite::{
    download_child, ensure_sandbox, install_child, load_child_handler, ChildOutcome, PanicCodes,
};
use crate::downloader::{log_progress, DownloadOptions};
use crate::handler::{check_cancelled, check_installed, reports_installed, ContentHandler};
use crate::registry::ExtensionManager;

/// Update type of the handler running reference steps.
pub const DEFAULT_REF_STEP_HANDLER: &str = "microsoft/steps:1";

const PANIC_CODES: PanicCodes = PanicCodes {
    backup: Some(erc::steps::CHILD_BACKUP_UNKNOWN_EXCEPTION),
    install: erc::steps::CHILD_INSTALL_UNKNOWN_EXCEPTION,
    apply: erc::steps::CHILD_APPLY_UNKNOWN_EXCEPTION,
};

/// Runs the instruction steps of a manifest in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepsHandler {
    options: DownloadOptions,
}

impl StepsHandler {
    /// Create a handler downloading detached manifests with `options`.
    #[must_use]
    pub const fn new(options: DownloadOptions) -> Self {
        Self { options }
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// Create one child per step, unless the children already exist.
    fn prepare(
        &self,
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
    ) -> Result<(), AducResult> {
        let count = workflow.step_count();
        if workflow.child_count() == count {
            return Ok(());
        }
        if workflow.child_count() != 0 {
            tracing::warn!(
                workflow_id = %workflow.id(),
                children = workflow.child_count(),
                steps = count,
                "Step children out of sync, rebuilding"
            );
            workflow.clear_children();
        }

        for index in 0..count {
            let child = self.create_child(extensions, workflow, index)?;
            workflow.push_child(child);
        }
        tracing::debug!(workflow_id = %workflow.id(), steps = count, "Prepared step children");
        Ok(())
    }

    fn create_child(
        &self,
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
        index: usize,
    ) -> Result<Workflow, AducResult> {
        let create_failed = |workflow: &mut Workflow, reason: String| {
            tracing::error!(
                workflow_id = %workflow.id(),
                step = index,
                reason = %reason,
                "Cannot create step"
            );
            workflow.set_result_details(format!("Cannot create step #{index}: {reason}"));
            AducResult::failure(erc::steps::CREATE_CHILD_WORKFLOW_FAILED)
        };

        if workflow.step(index).is_some_and(Step::is_inline) {
            return workflow
                .child_from_inline_step(index)
                .map_err(|e| create_failed(workflow, e.to_string()));
        }

        let entity = workflow
            .detached_manifest_file(index)
            .map_err(|e| create_failed(workflow, e.to_string()))?;
        let downloaded = extensions.download(&entity, workflow, &self.options, &log_progress);
        if downloaded.is_failure() {
            workflow.set_result_details(format!(
                "Cannot download detached manifest '{}' of step #{index}",
                entity.file_id
            ));
            return Err(downloaded);
        }

        let path = entity.target_path(workflow.work_folder());
        let mut child = workflow
            .child_from_manifest_file(&index.to_string(), &path)
            .map_err(|e| create_failed(workflow, e.to_string()))?;

        if extensions.is_components_enumerator_registered() {
            let Some(selector) = child.compatibility(0) else {
                workflow.set_result_details(format!("Step #{index} declares no compatibility"));
                return Err(AducResult::failure(
                    erc::steps::GET_REF_STEP_COMPATIBILITY_FAILED,
                ));
            };
            let selection = extensions.select_components(&selector).map_err(|e| {
                workflow.set_result_details(format!(
                    "Cannot select components for step #{index}: {e}"
                ));
                AducResult::failure(erc::steps::SELECT_COMPONENTS_FAILED)
            })?;
            child.set_selected_components(Some(selection));
        }
        Ok(child)
    }

    /// The components each step runs for. `None` stands for the host device.
    fn target_components(
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
    ) -> Result<Vec<Option<Value>>, AducResult> {
        if workflow.level() == 0 || !extensions.is_components_enumerator_registered() {
            return Ok(vec![None]);
        }
        let components: Option<Vec<Option<Value>>> = workflow
            .component_list()
            .ok()
            .flatten()
            .map(|list| list.iter().cloned().map(Some).collect());
        components.ok_or_else(|| {
            workflow.set_result_details("Missing or malformed selected components");
            AducResult::failure(erc::steps::INVALID_COMPONENTS_DATA)
        })
    }

    fn step_handler_type(workflow: &Workflow, index: usize) -> String {
        workflow
            .step(index)
            .and_then(Step::handler)
            .unwrap_or(DEFAULT_REF_STEP_HANDLER)
            .to_string()
    }

    /// Narrow an inline step to a single component. Reference steps keep the
    /// selection made from their own compatibility.
    fn bind_component(workflow: &mut Workflow, index: usize, component: Option<&Value>) {
        let Some(component) = component else {
            return;
        };
        if !workflow.step(index).is_some_and(Step::is_inline) {
            return;
        }
        if let Some(child) = workflow.child_mut(index) {
            child.set_selected_components(Some(Workflow::single_component_selection(component)));
        }
    }

    /// Run `visit` over every (component, step) pair. Returns the result to
    /// surface if the loop stopped early.
    fn visit_steps<F>(
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
        components: &[Option<Value>],
        mut visit: F,
    ) -> Option<AducResult>
    where
        F: FnMut(&dyn ContentHandler, &mut Workflow) -> ChildOutcome,
    {
        for component in components {
            for index in 0..workflow.child_count() {
                if workflow.is_cancel_requested() {
                    return Some(AducResult::cancelled());
                }
                Self::bind_component(workflow, index, component.as_ref());

                let update_type = Self::step_handler_type(workflow, index);
                let handler = match load_child_handler(extensions, workflow, index, &update_type) {
                    Ok(handler) => handler,
                    Err(result) => return Some(result),
                };
                let Some(child) = workflow.child_mut(index) else {
                    return Some(AducResult::failure(erc::steps::INVALID_CHILD_WORKFLOW));
                };
                tracing::debug!(
                    workflow_id = %child.id(),
                    level = child.level(),
                    update_type = %update_type,
                    "Running step"
                );

                if let Some(result) = visit(handler.as_ref(), child).settle(workflow) {
                    return Some(result);
                }
            }
        }
        None
    }

    /// Shared setup of every phase: work folder, children, target components.
    fn begin(
        &self,
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
    ) -> Result<Vec<Option<Value>>, AducResult> {
        if let Some(result) = ensure_sandbox(workflow, erc::steps::CREATE_SANDBOX_FAILURE) {
            return Err(result);
        }
        self.prepare(extensions, workflow)?;
        Self::target_components(extensions, workflow)
    }

    // =========================================================================
    // Phases
    // =========================================================================

    fn run_download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        let components = match self.begin(extensions, workflow) {
            Ok(components) => components,
            Err(result) => return result,
        };
        if components.is_empty() {
            tracing::info!(workflow_id = %workflow.id(), "No matching components, nothing to download");
            workflow.set_result_details("Optional step (no matching components)");
            return AducResult::from_code(ResultCode::DownloadSkippedNoMatchingComponents);
        }

        let stopped = Self::visit_steps(extensions, workflow, &components, |handler, child| {
            download_child(
                handler,
                extensions,
                child,
                erc::steps::CHILD_DOWNLOAD_UNKNOWN_EXCEPTION,
            )
        });
        stopped.unwrap_or_else(|| AducResult::from_code(ResultCode::DownloadSuccess))
    }

    fn run_install(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        let components = match self.begin(extensions, workflow) {
            Ok(components) => components,
            Err(result) => return result,
        };
        if components.is_empty() {
            tracing::info!(workflow_id = %workflow.id(), "No matching components, nothing to install");
            workflow.set_result_details("Optional step (no matching components)");
            return AducResult::from_code(ResultCode::InstallSkippedNoMatchingComponents);
        }

        let stopped = Self::visit_steps(extensions, workflow, &components, |handler, child| {
            install_child(handler, extensions, child, PANIC_CODES)
        });
        if let Some(result) = stopped {
            return result;
        }
        if workflow.is_cancel_requested() {
            AducResult::cancelled()
        } else {
            AducResult::from_code(ResultCode::InstallSuccess)
        }
    }

    fn run_is_installed(
        &self,
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
    ) -> AducResult {
        let components = match self.begin(extensions, workflow) {
            Ok(components) => components,
            Err(result) => return result,
        };

        // Nothing to install counts as installed. The skip itself is recorded
        // on the node by download and install; this check only reports.
        if components.is_empty() {
            tracing::debug!(workflow_id = %workflow.id(), "No matching components, optional step is installed");
            return AducResult::from_code(ResultCode::IsInstalledInstalled);
        }

        for component in &components {
            for index in 0..workflow.child_count() {
                Self::bind_component(workflow, index, component.as_ref());
                let update_type = Self::step_handler_type(workflow, index);
                let handler = match load_child_handler(extensions, workflow, index, &update_type) {
                    Ok(handler) => handler,
                    Err(result) => return result,
                };
                let Some(child) = workflow.child_mut(index) else {
                    return AducResult::failure(erc::steps::INVALID_CHILD_WORKFLOW);
                };
                let result = check_installed(handler.as_ref(), extensions, child);
                if !reports_installed(result) {
                    tracing::debug!(
                        workflow_id = %child.id(),
                        result = %result,
                        "Step not installed"
                    );
                    return result;
                }
            }
        }

        AducResult::from_code(ResultCode::IsInstalledInstalled)
    }
}

impl ContentHandler for StepsHandler {
    fn download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "download") {
            return result;
        }
        let result = self.run_download(extensions, workflow);
        workflow.record(result, UpdateState::DownloadSucceeded);
        result
    }

    fn backup(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::BackupSuccess)
    }

    fn install(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "install") {
            return result;
        }
        let result = self.run_install(extensions, workflow);
        workflow.record(result, UpdateState::InstallSucceeded);
        result
    }

    // Each step was already applied right after its install.
    fn apply(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "apply") {
            return result;
        }
        let result = AducResult::from_code(ResultCode::ApplySuccess);
        workflow.record(result, UpdateState::Idle);
        result
    }

    fn cancel(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        tracing::info!(workflow_id = %workflow.id(), "Cancel requested");
        workflow.request_cancel();
        AducResult::from_code(ResultCode::CancelSuccess)
    }

    fn is_installed(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run_is_installed(extensions, workflow)
    }

    fn restore(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::RestoreSuccess)
    }
}
