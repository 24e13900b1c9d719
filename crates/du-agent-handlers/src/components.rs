//! The components composite handler.
//!
//! The update carries an instructions file (any payload whose name ends with
//! `instructions.json`) listing `installItems`. Every selected component gets
//! every item, in order, each run by the handler its `updateType` names with
//! that component alone selected.

use std::sync::Arc;

use du_agent_core::{erc, AducResult, ResultCode, UpdateState};
use du_agent_store::InstalledCriteriaStore;
use du_agent_workflow::{FileEntity, Workflow};
use serde_json::Value;

use crate::composite::{ensure_sandbox, install_child, PanicCodes};
use crate::downloader::{log_progress, DownloadOptions};
use crate::handler::{check_cancelled, guarded, ContentHandler};
use crate::registry::ExtensionManager;

/// Suffix identifying the instructions file among the payloads.
pub const INSTRUCTIONS_FILE_SUFFIX: &str = "instructions.json";

const PANIC_CODES: PanicCodes = PanicCodes {
    backup: None,
    install: erc::components::INSTALL_UNKNOWN_EXCEPTION,
    apply: erc::components::APPLY_UNKNOWN_EXCEPTION,
};

/// Applies install items to each selected component.
pub struct ComponentsHandler {
    store: Arc<dyn InstalledCriteriaStore>,
    options: DownloadOptions,
}

impl std::fmt::Debug for ComponentsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentsHandler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ComponentsHandler {
    /// Create a handler recording installs in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn InstalledCriteriaStore>, options: DownloadOptions) -> Self {
        Self { store, options }
    }

    /// The selected components. No selection counts as an empty one.
    fn components(workflow: &mut Workflow) -> Result<Vec<Value>, AducResult> {
        let components = workflow.component_list().map(|list| list.cloned().unwrap_or_default());
        components.map_err(|e| {
            tracing::error!(workflow_id = %workflow.id(), error = %e, "Invalid selected components");
            workflow.set_result_details("Invalid component data");
            AducResult::failure(erc::components::INVALID_COMPONENTS_DATA)
        })
    }

    fn instructions_file(workflow: &Workflow) -> Option<FileEntity> {
        workflow
            .files()
            .into_iter()
            .find(|f| f.target_filename.ends_with(INSTRUCTIONS_FILE_SUFFIX))
    }

    /// Read the `installItems` of the instructions file.
    fn install_items(workflow: &mut Workflow) -> Result<Vec<Value>, AducResult> {
        let Some(entity) = Self::instructions_file(workflow) else {
            workflow.set_result_details("No instructions file");
            return Err(AducResult::failure(erc::components::NO_INSTRUCTION_FILE));
        };
        let path = entity.target_path(workflow.work_folder());
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str::<Value>(&data).map_err(|e| e.to_string()))
            .and_then(|doc| {
                doc.get("installItems")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| "missing installItems".to_string())
            });
        parsed.map_err(|reason| {
            tracing::error!(path = %path.display(), reason = %reason, "Cannot parse instructions");
            workflow.set_result_details(format!(
                "Cannot parse instructions '{}': {reason}",
                entity.target_filename
            ));
            AducResult::failure(erc::components::INSTRUCTION_PARSE_FAILURE)
        })
    }

    // =========================================================================
    // Phases
    // =========================================================================

    fn run_download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        let components = match Self::components(workflow) {
            Ok(components) => components,
            Err(result) => return result,
        };
        if components.is_empty() {
            tracing::info!(workflow_id = %workflow.id(), "No components selected, nothing to download");
            return AducResult::from_code(ResultCode::DownloadSkippedNoMatchingComponents);
        }
        if let Some(result) = ensure_sandbox(workflow, erc::components::CREATE_SANDBOX_FAILURE) {
            return result;
        }

        for (index, entity) in workflow.files().into_iter().enumerate() {
            let result = guarded(erc::components::DOWNLOAD_FAILURE_UNKNOWN_EXCEPTION, || {
                extensions.download(&entity, workflow, &self.options, &log_progress)
            });
            if result.is_failure() {
                workflow.set_result_details(format!(
                    "Cannot download file #{index} '{}'",
                    entity.file_id
                ));
                return result;
            }
        }
        AducResult::from_code(ResultCode::DownloadSuccess)
    }

    fn run_install(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        let components = match Self::components(workflow) {
            Ok(components) => components,
            Err(result) => return result,
        };
        if components.is_empty() {
            tracing::info!(workflow_id = %workflow.id(), "No components selected, nothing to install");
            return AducResult::from_code(ResultCode::InstallSkippedNoMatchingComponents);
        }
        let items = match Self::install_items(workflow) {
            Ok(items) => items,
            Err(result) => return result,
        };

        for (c, component) in components.iter().enumerate() {
            tracing::debug!(
                workflow_id = %workflow.id(),
                component = c,
                items = items.len(),
                "Installing items for component"
            );
            for (i, item) in items.iter().enumerate() {
                if workflow.is_cancel_requested() {
                    return AducResult::cancelled();
                }
                if let Some(result) =
                    Self::install_item(extensions, workflow, component, c, item, i)
                {
                    return result;
                }
            }
        }

        self.persist_installed_criteria(workflow)
            .unwrap_or_else(|| AducResult::from_code(ResultCode::InstallSuccess))
    }

    /// Run one install item for one component. Returns the result to surface
    /// if the whole install must stop.
    fn install_item(
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
        component: &Value,
        component_index: usize,
        item: &Value,
        item_index: usize,
    ) -> Option<AducResult> {
        let item_id = format!("{component_index}.{item_index}");
        let mut item_workflow = match workflow.child_from_instruction(&item_id, item) {
            Ok(item_workflow) => item_workflow,
            Err(e) => {
                let name = component.get("name").and_then(Value::as_str).unwrap_or("?");
                tracing::error!(item = item_index, component = name, error = %e, "Bad install item");
                workflow.set_result_details(format!(
                    "Cannot prepare install item #{item_index} for component '{name}': {e}"
                ));
                let code = if matches!(e, du_agent_workflow::WorkflowError::InstructionNoUpdateType)
                {
                    erc::components::NO_UPDATE_TYPE
                } else {
                    erc::components::INSTALLITEM_BAD_DATA
                };
                return Some(AducResult::failure(code));
            }
        };
        item_workflow
            .set_selected_components(Some(Workflow::single_component_selection(component)));

        let update_type = item_workflow.update_type().unwrap_or_default().to_string();
        let handler = match extensions.load_handler(&update_type) {
            Ok(handler) => handler,
            Err(e) => {
                workflow.set_result_details(format!(
                    "Cannot load handler '{update_type}' for install item #{item_index}: {e}"
                ));
                return Some(AducResult::failure(e.extended_code()));
            }
        };

        tracing::info!(
            item = item_index,
            component = component_index,
            update_type = %update_type,
            "Installing item"
        );
        install_child(handler.as_ref(), extensions, &mut item_workflow, PANIC_CODES)
            .settle(workflow)
    }

    fn persist_installed_criteria(&self, workflow: &Workflow) -> Option<AducResult> {
        let Some(criteria) = workflow.installed_criteria() else {
            tracing::warn!(workflow_id = %workflow.id(), "No installed criteria to persist");
            return None;
        };
        match self.store.persist(criteria) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(criteria, error = %e, "Cannot persist installed criteria");
                Some(AducResult::failure(
                    erc::components::INSTALLCRITERIA_PERSIST_FAILURE,
                ))
            }
        }
    }
}

impl ContentHandler for ComponentsHandler {
    fn download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "download") {
            return result;
        }
        let result = self.run_download(extensions, workflow);
        workflow.record(result, UpdateState::DownloadSucceeded);
        result
    }

    fn install(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "install") {
            return result;
        }
        let result = self.run_install(extensions, workflow);
        workflow.record(result, UpdateState::InstallSucceeded);
        result
    }

    fn apply(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "apply") {
            return result;
        }
        let result = AducResult::from_code(ResultCode::ApplySuccess);
        let update_id = workflow.expected_update_id().to_string();
        workflow.set_installed_update_id(update_id);
        workflow.record(result, UpdateState::Idle);
        result
    }

    fn cancel(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        tracing::info!(workflow_id = %workflow.id(), "Cancel requested");
        workflow.request_cancel();
        AducResult::from_code(ResultCode::CancelSuccess)
    }

    fn is_installed(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        match workflow.installed_criteria() {
            Some(criteria) => self.store.get_is_installed(criteria),
            None => AducResult::failure(erc::components::MISSING_INSTALLED_CRITERIA),
        }
    }
}
