//! The bundle composite handler.
//!
//! A bundle lists nested full manifests (`bundledUpdates`). Each one is
//! downloaded into the bundle's work folder and becomes a child node with its
//! own folder, run by the handler its `updateType` names. Installed criteria
//! of the bundle itself is persisted once every member has applied.

use std::sync::Arc;

use du_agent_core::{erc, AducResult, ResultCode, UpdateState};
use du_agent_store::InstalledCriteriaStore;
use du_agent_workflow::Workflow;
use serde_json::Value;

use crate::composite::{ensure_sandbox, load_child_handler, ChildOutcome};
use crate::downloader::{log_progress, DownloadOptions};
use crate::handler::{check_cancelled, guarded, ContentHandler};
use crate::registry::ExtensionManager;
use crate::translate::{translate, Disposition};

/// Runs the members of a bundle in order.
pub struct BundleHandler {
    store: Arc<dyn InstalledCriteriaStore>,
    options: DownloadOptions,
}

impl std::fmt::Debug for BundleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleHandler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BundleHandler {
    /// Create a handler recording installs in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn InstalledCriteriaStore>, options: DownloadOptions) -> Self {
        Self { store, options }
    }

    /// Download every member manifest and create one child per member,
    /// unless the children already exist.
    fn prepare(
        &self,
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
    ) -> Result<(), AducResult> {
        if let Some(result) = ensure_sandbox(workflow, erc::workflow::SANDBOX_CREATE_FAILURE) {
            return Err(result);
        }
        let count = workflow.bundled_update_count();
        if workflow.child_count() == count {
            return Ok(());
        }
        workflow.clear_children();

        let mut children = Vec::with_capacity(count);
        for index in 0..count {
            let entity = workflow.bundled_update_file(index).map_err(|e| {
                workflow.set_result_details(format!("Bad bundle member #{index}: {e}"));
                AducResult::failure(erc::bundle::CREATE_CHILD_WORKFLOW_FAILED)
            })?;
            tracing::info!(member = index, file_id = %entity.file_id, "Downloading bundle member manifest");

            let downloaded = guarded(erc::bundle::DOWNLOAD_FAILURE_UNKNOWN_EXCEPTION, || {
                extensions.download(&entity, workflow, &self.options, &log_progress)
            });
            if downloaded.is_failure() {
                workflow.set_result_details(format!(
                    "Cannot download manifest of bundle member #{index} '{}'",
                    entity.file_id
                ));
                return Err(downloaded);
            }

            let path = entity.target_path(workflow.work_folder());
            let child = workflow
                .child_from_manifest_file(&index.to_string(), &path)
                .map_err(|e| {
                    workflow.set_result_details(format!("Bad manifest of bundle member #{index}: {e}"));
                    AducResult::failure(erc::bundle::CREATE_CHILD_WORKFLOW_FAILED)
                })?;
            children.push(child);
        }

        for child in children {
            workflow.push_child(child);
        }
        Ok(())
    }

    /// Select the components member `index` targets. Returns how many were
    /// selected, or `None` when no enumerator is registered and the member
    /// targets the host.
    fn select_components(
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
        index: usize,
    ) -> Result<Option<usize>, AducResult> {
        if !extensions.is_components_enumerator_registered() {
            return Ok(None);
        }
        let Some(selector) = workflow.child(index).and_then(|c| c.compatibility(0)) else {
            workflow.set_result_details(format!("Bundle member #{index} declares no compatibility"));
            return Err(AducResult::failure(erc::bundle::GET_LEAF_COMPAT_FAILURE));
        };
        let selection = extensions.select_components(&selector).map_err(|e| {
            workflow.set_result_details(format!(
                "Cannot select components for bundle member #{index}: {e}"
            ));
            AducResult::failure(erc::bundle::SELECT_COMPONENTS_FAILED)
        })?;

        let count = selection
            .get("components")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        tracing::debug!(member = index, selector = %selector, count, "Selected components");
        if let Some(child) = workflow.child_mut(index) {
            child.set_selected_components(Some(selection));
        }
        Ok(Some(count))
    }

    fn member_update_type(workflow: &Workflow, index: usize) -> String {
        workflow
            .child(index)
            .and_then(Workflow::update_type)
            .unwrap_or_default()
            .to_string()
    }

    /// Resolve member `index`'s handler and run `phase` on it.
    fn run_member<F>(
        extensions: &ExtensionManager,
        workflow: &mut Workflow,
        index: usize,
        phase: F,
    ) -> Result<ChildOutcome, AducResult>
    where
        F: FnOnce(&dyn ContentHandler, &mut Workflow) -> ChildOutcome,
    {
        let update_type = Self::member_update_type(workflow, index);
        let handler = load_child_handler(extensions, workflow, index, &update_type)?;
        let child = workflow
            .child_mut(index)
            .ok_or_else(|| AducResult::failure(erc::bundle::CREATE_CHILD_WORKFLOW_FAILED))?;
        tracing::info!(member = index, update_type = %update_type, "Running bundle member");
        Ok(phase(handler.as_ref(), child))
    }

    // =========================================================================
    // Phases
    // =========================================================================

    fn run_download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Err(result) = self.prepare(extensions, workflow) {
            return result;
        }

        for index in 0..workflow.child_count() {
            if workflow.is_cancel_requested() {
                return AducResult::cancelled();
            }
            let selected = match Self::select_components(extensions, workflow, index) {
                Ok(selected) => selected,
                Err(result) => return result,
            };
            if selected == Some(0) {
                if let Some(child) = workflow.child_mut(index) {
                    tracing::info!(member = index, "No matching components, skipping member");
                    let compatibility = child.compatibility(0).unwrap_or_default();
                    child.record(
                        AducResult::from_code(ResultCode::DownloadSkippedNoMatchingComponents),
                        UpdateState::DownloadSucceeded,
                    );
                    child.set_result_details(format!("No matching components ({compatibility})"));
                }
                continue;
            }

            let outcome = Self::run_member(extensions, workflow, index, |handler, child| {
                let result = guarded(erc::bundle::DOWNLOAD_FAILURE_UNKNOWN_EXCEPTION, || {
                    handler.download(extensions, child)
                });
                child_outcome(result, child)
            });
            match outcome.map(|o| o.settle(workflow)) {
                Ok(None) => {}
                Ok(Some(result)) | Err(result) => return result,
            }
        }
        AducResult::from_code(ResultCode::DownloadSuccess)
    }

    fn run_install(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Err(result) = self.prepare(extensions, workflow) {
            return result;
        }

        for index in 0..workflow.child_count() {
            if workflow.is_cancel_requested() {
                return AducResult::cancelled();
            }
            match Self::select_components(extensions, workflow, index) {
                Ok(Some(0)) => {
                    if let Some(child) = workflow.child_mut(index) {
                        child.record(
                            AducResult::from_code(ResultCode::InstallSkippedNoMatchingComponents),
                            UpdateState::InstallSucceeded,
                        );
                    }
                    continue;
                }
                Ok(_) => {}
                Err(result) => return result,
            }

            let outcome = Self::run_member(extensions, workflow, index, |handler, child| {
                let result = guarded(erc::bundle::CHILD_UNKNOWN_EXCEPTION, || {
                    handler.install(extensions, child)
                });
                child_outcome(result, child)
            });
            match outcome.map(|o| o.settle(workflow)) {
                Ok(None) => {}
                Ok(Some(result)) | Err(result) => return result,
            }
        }
        AducResult::from_code(ResultCode::InstallSuccess)
    }

    fn run_apply(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Err(result) = self.prepare(extensions, workflow) {
            return result;
        }

        for index in 0..workflow.child_count() {
            if workflow.is_cancel_requested() {
                return AducResult::cancelled();
            }
            if workflow
                .child(index)
                .is_some_and(|c| c.result().code.is_skipped())
            {
                tracing::debug!(member = index, "Member was skipped, not applying");
                continue;
            }

            let outcome = Self::run_member(extensions, workflow, index, |handler, child| {
                let result = guarded(erc::bundle::CHILD_UNKNOWN_EXCEPTION, || {
                    handler.apply(extensions, child)
                });
                child_outcome(result, child)
            });
            match outcome.map(|o| o.settle(workflow)) {
                Ok(None) => {}
                Ok(Some(result)) | Err(result) => return result,
            }
        }

        if let Some(criteria) = workflow.installed_criteria() {
            if let Err(e) = self.store.persist(criteria) {
                tracing::error!(criteria, error = %e, "Cannot persist installed criteria");
                return AducResult::failure(erc::bundle::INSTALLCRITERIA_PERSIST_FAILURE);
            }
        } else {
            tracing::warn!(workflow_id = %workflow.id(), "No installed criteria to persist");
        }
        let update_id = workflow.expected_update_id().to_string();
        workflow.set_installed_update_id(update_id);
        AducResult::from_code(ResultCode::ApplySuccess)
    }
}

/// Classify a member's phase result through the translation table.
fn child_outcome(result: AducResult, child: &Workflow) -> ChildOutcome {
    let translation = translate(result, child.interrupts());
    match translation.disposition {
        Disposition::Proceed | Disposition::NextSibling => {
            ChildOutcome::Continue(translation.interrupts)
        }
        Disposition::Abort => ChildOutcome::Stop {
            result: translation.result,
            interrupts: translation.interrupts,
            details: child.result_details().to_string(),
        },
    }
}

impl ContentHandler for BundleHandler {
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

    fn apply(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "apply") {
            return result;
        }
        let result = self.run_apply(extensions, workflow);
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
            None => AducResult::failure(erc::bundle::MISSING_INSTALLED_CRITERIA),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256_base64_bytes;
    use crate::mock::{MockComponentEnumerator, MockContentDownloader};
    use crate::simulator::{Operation, SimulatorHandler};
    use du_agent_store::mock::MockCriteriaStore;
    use serde_json::json;
    use tempfile::TempDir;

    const SCRIPT: &str = "microsoft/script:1";

    struct Fixture {
        extensions: ExtensionManager,
        simulator: Arc<SimulatorHandler>,
        store: Arc<MockCriteriaStore>,
        handler: BundleHandler,
        workflow: Workflow,
        _dir: TempDir,
    }

    fn member_manifest(name: &str) -> String {
        json!({
            "manifestVersion": "5",
            "updateId": {"provider": "Contoso", "name": name, "version": "1.0"},
            "updateType": SCRIPT,
            "installedCriteria": format!("{name}-1.0"),
            "compatibility": [{"group": name}],
            "files": {}
        })
        .to_string()
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let downloader = MockContentDownloader::new();
        let mut files = serde_json::Map::new();
        for (id, name) in [("m1", "motors"), ("m2", "cameras")] {
            let manifest = member_manifest(name);
            files.insert(
                id.to_string(),
                json!({
                    "fileName": format!("{name}.importmanifest.json"),
                    "sizeInBytes": manifest.len(),
                    "hashes": {"sha256": sha256_base64_bytes(manifest.as_bytes())}
                }),
            );
            downloader.set_content(id, manifest);
        }
        let manifest = json!({
            "manifestVersion": "5",
            "updateId": {"provider": "Contoso", "name": "Bundle", "version": "1.0"},
            "installedCriteria": "bundle-1.0",
            "bundledUpdates": ["m1", "m2"],
            "files": files
        });
        let action = json!({
            "workflow": {"id": "wf-bundle", "action": 3},
            "updateManifest": manifest.to_string()
        });
        let workflow = Workflow::from_action_json(&action.to_string(), dir.path()).unwrap();

        let extensions = ExtensionManager::new();
        extensions.set_content_downloader(Arc::new(downloader));
        let simulator = Arc::new(SimulatorHandler::new());
        extensions.set_handler(SCRIPT, Arc::clone(&simulator) as Arc<dyn ContentHandler>);
        let store = Arc::new(MockCriteriaStore::new());
        let handler = BundleHandler::new(
            Arc::clone(&store) as Arc<dyn InstalledCriteriaStore>,
            DownloadOptions::default(),
        );
        Fixture {
            extensions,
            simulator,
            store,
            handler,
            workflow,
            _dir: dir,
        }
    }

    #[test]
    fn members_run_in_order_and_criteria_persist_after_apply() {
        let mut f = setup();

        assert_eq!(
            f.handler.download(&f.extensions, &mut f.workflow).code,
            ResultCode::DownloadSuccess
        );
        assert_eq!(f.workflow.child_count(), 2);
        assert!(f.workflow.child(1).unwrap().work_folder().ends_with("wf-bundle/1"));

        assert_eq!(
            f.handler.install(&f.extensions, &mut f.workflow).code,
            ResultCode::InstallSuccess
        );
        assert!(f.store.records().is_empty());

        assert_eq!(
            f.handler.apply(&f.extensions, &mut f.workflow).code,
            ResultCode::ApplySuccess
        );
        assert_eq!(f.store.records(), ["bundle-1.0"]);
        let installs: Vec<_> = f
            .simulator
            .calls_of(Operation::Install)
            .into_iter()
            .filter_map(|c| c.installed_criteria)
            .collect();
        assert_eq!(installs, ["motors-1.0", "cameras-1.0"]);
    }

    #[test]
    fn apply_rebuilds_missing_members_before_applying() {
        let mut f = setup();
        assert_eq!(f.workflow.child_count(), 0);

        let result = f.handler.apply(&f.extensions, &mut f.workflow);

        assert_eq!(result.code, ResultCode::ApplySuccess);
        assert_eq!(f.workflow.child_count(), 2);
        assert_eq!(f.simulator.calls_of(Operation::Apply).len(), 2);
        assert_eq!(f.store.records(), ["bundle-1.0"]);
    }

    #[test]
    fn apply_without_member_manifests_persists_nothing() {
        let mut f = setup();
        let downloader = MockContentDownloader::new();
        downloader.fail("m1");
        f.extensions.set_content_downloader(Arc::new(downloader));

        let result = f.handler.apply(&f.extensions, &mut f.workflow);

        assert!(result.is_failure());
        assert!(f.simulator.calls_of(Operation::Apply).is_empty());
        assert!(f.store.records().is_empty());
        assert_eq!(f.workflow.state(), UpdateState::Failed);
    }

    #[test]
    fn failing_member_leaves_later_members_untouched() {
        let mut f = setup();
        f.simulator
            .set_result_for("motors-1.0", Operation::Install, AducResult::failure(0x99));

        let result = f.handler.install(&f.extensions, &mut f.workflow);

        assert_eq!(result, AducResult::failure(0x99));
        assert_eq!(f.simulator.calls_of(Operation::Install).len(), 1);
        assert_eq!(f.workflow.child(1).unwrap().result(), AducResult::default());
        assert_eq!(f.workflow.state(), UpdateState::Failed);
    }

    #[test]
    fn immediate_reboot_stops_the_bundle() {
        let mut f = setup();
        f.simulator.set_result_for(
            "motors-1.0",
            Operation::Install,
            ResultCode::InstallRequiredImmediateReboot,
        );

        let result = f.handler.install(&f.extensions, &mut f.workflow);

        assert_eq!(result.code, ResultCode::InstallRequiredImmediateReboot);
        assert!(f.workflow.interrupts().immediate_reboot);
        assert_eq!(f.simulator.calls_of(Operation::Install).len(), 1);
    }

    #[test]
    fn members_without_matching_components_are_skipped() {
        let mut f = setup();
        let enumerator = MockComponentEnumerator::new();
        enumerator.set_selection_for(
            r#"{"group":"motors"}"#,
            r#"{"components":[{"id":"0","name":"left-motor"}]}"#,
        );
        f.extensions.set_component_enumerator(Arc::new(enumerator));

        let result = f.handler.download(&f.extensions, &mut f.workflow);

        assert_eq!(result.code, ResultCode::DownloadSuccess);
        assert_eq!(f.simulator.calls_of(Operation::Download).len(), 1);
        assert_eq!(
            f.workflow.child(1).unwrap().result().code,
            ResultCode::DownloadSkippedNoMatchingComponents
        );
    }

    #[test]
    fn missing_member_manifest_fails_download() {
        let mut f = setup();
        let downloader = MockContentDownloader::new();
        downloader.fail("m1");
        f.extensions.set_content_downloader(Arc::new(downloader));

        let result = f.handler.download(&f.extensions, &mut f.workflow);

        assert!(result.is_failure());
        assert_eq!(f.workflow.child_count(), 0);
        assert!(f.simulator.calls().is_empty());
    }

    #[test]
    fn is_installed_uses_the_bundle_criteria() {
        let mut f = setup();
        assert_eq!(
            f.handler.is_installed(&f.extensions, &mut f.workflow).code,
            ResultCode::IsInstalledNotInstalled
        );
        f.store.persist("bundle-1.0").unwrap();
        assert_eq!(
            f.handler.is_installed(&f.extensions, &mut f.workflow).code,
            ResultCode::IsInstalledInstalled
        );
    }
}
