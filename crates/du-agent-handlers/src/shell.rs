//! Leaf handler that performs device changes through the privileged
//! command launcher.
//!
//! The agent itself runs unprivileged. Install and apply are delegated to
//! `du-shell`, invoked as
//!
//! ```text
//! du-shell --update-type <type> --update-action <action> \
//!          --target-data <primary file> [--target-options <opt>]...
//! ```
//!
//! Exit status 0 is success; any other status is folded into the extended
//! result code.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use du_agent_core::{erc, AducResult, ResultCode, UpdateState, UpdateType};
use du_agent_store::InstalledCriteriaStore;
use du_agent_workflow::{sandbox, Workflow};

use crate::downloader::{log_progress, DownloadOptions};
use crate::handler::{check_cancelled, ContentHandler};
use crate::registry::ExtensionManager;

/// Runs the privileged launcher.
pub trait CommandLauncher: Send + Sync {
    /// Run the launcher with `args`. Returns the exit code, or `None` if the
    /// process was terminated by a signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    fn launch(&self, args: &[String]) -> std::io::Result<Option<i32>>;
}

/// Launches an executable and logs its output.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    /// Launch `program` for every command.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CommandLauncher for ProcessLauncher {
    fn launch(&self, args: &[String]) -> std::io::Result<Option<i32>> {
        tracing::info!(program = %self.program.display(), ?args, "Launching");
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::info!(target: "du_shell", "{line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::warn!(target: "du_shell", "{line}");
        }
        Ok(output.status.code())
    }
}

const PRIMARY_FILE_PROPERTIES: [&str; 2] = ["scriptFileName", "primaryFile"];

/// Generic leaf for shell-backed update types such as `microsoft/apt:1`,
/// `microsoft/script:1` and `microsoft/swupdate:1`.
pub struct ShellCommandHandler {
    launcher: Arc<dyn CommandLauncher>,
    store: Arc<dyn InstalledCriteriaStore>,
    options: DownloadOptions,
}

impl ShellCommandHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn CommandLauncher>,
        store: Arc<dyn InstalledCriteriaStore>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            launcher,
            store,
            options,
        }
    }

    fn check_components(workflow: &mut Workflow) -> Option<AducResult> {
        let count = workflow
            .component_list()
            .ok()
            .flatten()
            .map_or(0, Vec::len);
        if count <= 1 {
            return None;
        }
        let result = AducResult::failure(erc::shell::TOO_MANY_COMPONENTS);
        workflow.set_result_details(format!(
            "A shell step targets one component at a time, got {count}"
        ));
        workflow.record(result, UpdateState::Failed);
        Some(result)
    }

    fn primary_file(workflow: &Workflow) -> Option<PathBuf> {
        let named = PRIMARY_FILE_PROPERTIES
            .iter()
            .find_map(|key| workflow.handler_properties().get(*key))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let name = named.or_else(|| workflow.file(0).map(|f| f.target_filename))?;
        if let Err(e) = sandbox::check_name("primary file", &name) {
            tracing::error!(workflow_id = %workflow.id(), error = %e, "Rejected primary file");
            return None;
        }
        Some(workflow.work_folder().join(name))
    }

    fn command_args(workflow: &Workflow, action: &str, target: &std::path::Path) -> Vec<String> {
        let update_type = workflow.update_type().unwrap_or_default();
        let update_type = update_type
            .parse::<UpdateType>()
            .map_or_else(|_| update_type.to_string(), |t| t.name().to_string());

        let mut args = vec![
            "--update-type".to_string(),
            update_type,
            "--update-action".to_string(),
            action.to_string(),
            "--target-data".to_string(),
            target.display().to_string(),
        ];

        let mut options: Vec<String> = workflow
            .handler_properties()
            .get("arguments")
            .and_then(serde_json::Value::as_str)
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        options.push("--work-folder".to_string());
        options.push(workflow.work_folder().display().to_string());
        if let Some(criteria) = workflow.installed_criteria() {
            options.push("--installed-criteria".to_string());
            options.push(criteria.to_string());
        }
        for option in options {
            args.push("--target-options".to_string());
            args.push(option);
        }
        args
    }

    /// Run `action` and map the exit status onto `success`.
    fn run(&self, workflow: &mut Workflow, action: &str, success: ResultCode) -> AducResult {
        let Some(target) = Self::primary_file(workflow).filter(|p| p.exists()) else {
            workflow.set_result_details("Primary file is missing from the work folder");
            return AducResult::failure(erc::shell::MISSING_PRIMARY_FILE);
        };

        let args = Self::command_args(workflow, action, &target);
        match self.launcher.launch(&args) {
            Ok(Some(0)) => AducResult::from_code(success),
            Ok(Some(status)) => {
                tracing::error!(workflow_id = %workflow.id(), action, status, "Command failed");
                workflow.set_result_details(format!("{action} exited with status {status}"));
                AducResult::failure(erc::child_process_exit(status))
            }
            Ok(None) => {
                tracing::error!(workflow_id = %workflow.id(), action, "Command terminated by signal");
                workflow.set_result_details(format!("{action} was terminated by a signal"));
                AducResult::failure(erc::shell::TERMINATED_BY_SIGNAL)
            }
            Err(e) => {
                tracing::error!(workflow_id = %workflow.id(), action, error = %e, "Cannot launch command");
                workflow.set_result_details(format!("cannot launch {action}: {e}"));
                AducResult::failure(erc::shell::LAUNCH_FAILURE)
            }
        }
    }
}

impl ContentHandler for ShellCommandHandler {
    fn download(&self, extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "download") {
            return result;
        }
        if let Some(result) = Self::check_components(workflow) {
            return result;
        }

        if self.is_installed(extensions, workflow).code == ResultCode::IsInstalledInstalled {
            let result = AducResult::from_code(ResultCode::DownloadSkippedUpdateAlreadyInstalled);
            workflow.record(result, UpdateState::DownloadSucceeded);
            return result;
        }

        for entity in workflow.files() {
            let result = extensions.download(&entity, workflow, &self.options, &log_progress);
            if result.is_failure() {
                workflow.set_result_details(format!("Cannot download '{}'", entity.file_id));
                workflow.record(result, UpdateState::Failed);
                return result;
            }
        }

        let result = AducResult::from_code(ResultCode::DownloadSuccess);
        workflow.record(result, UpdateState::DownloadSucceeded);
        result
    }

    fn install(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "install") {
            return result;
        }
        if let Some(result) = Self::check_components(workflow) {
            return result;
        }

        let result = self.run(workflow, "install", ResultCode::InstallSuccess);
        workflow.record(result, UpdateState::InstallSucceeded);
        result
    }

    fn apply(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        if let Some(result) = check_cancelled(workflow, "apply") {
            return result;
        }
        let mut result = self.run(workflow, "apply", ResultCode::ApplySuccess);
        if result.is_success() {
            // Recorded only once the update is active on the device.
            match workflow.installed_criteria() {
                Some(criteria) => {
                    if let Err(e) = self.store.persist(criteria) {
                        tracing::error!(criteria, error = %e, "Cannot persist installed criteria");
                        result = AducResult::failure(erc::shell::INSTALLCRITERIA_PERSIST_FAILURE);
                    }
                }
                None => {
                    tracing::warn!(workflow_id = %workflow.id(), "No installed criteria to persist");
                }
            }
        }
        workflow.record(result, UpdateState::Idle);
        result
    }

    fn cancel(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        tracing::info!(workflow_id = %workflow.id(), "Shell commands cannot be cancelled");
        AducResult::from_code(ResultCode::CancelUnableToCancel)
    }

    fn is_installed(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        match workflow.installed_criteria() {
            Some(criteria) => self.store.get_is_installed(criteria),
            None => AducResult::failure(erc::shell::MISSING_INSTALLED_CRITERIA),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockContentDownloader, MockLauncher};
    use du_agent_store::mock::MockCriteriaStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn action(workflow_id: &str) -> String {
        let manifest = json!({
            "manifestVersion": "5",
            "updateId": {"provider": "Contoso", "name": "Tool", "version": "1.0"},
            "updateType": "microsoft/script:1",
            "installedCriteria": "tool-1.0",
            "compatibility": [{"deviceManufacturer": "contoso"}],
            "files": {
                "f1": {"fileName": "install.sh", "sizeInBytes": 2,
                       "hashes": {"sha256": crate::hash::sha256_base64_bytes(b"ok")}}
            },
            "createdDateTime": "2024-01-01T00:00:00Z"
        });
        json!({
            "workflow": {"id": workflow_id, "action": 3},
            "updateManifest": manifest.to_string(),
            "fileUrls": {"f1": "http://example.com/install.sh"}
        })
        .to_string()
    }

    struct Fixture {
        extensions: ExtensionManager,
        launcher: Arc<MockLauncher>,
        store: Arc<MockCriteriaStore>,
        handler: ShellCommandHandler,
        workflow: Workflow,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let workflow = Workflow::from_action_json(&action("wf-shell"), dir.path()).unwrap();
        let extensions = ExtensionManager::new();
        let downloader = MockContentDownloader::new();
        downloader.set_content("f1", b"ok".to_vec());
        extensions.set_content_downloader(Arc::new(downloader));

        let launcher = Arc::new(MockLauncher::new());
        let store = Arc::new(MockCriteriaStore::new());
        let handler = ShellCommandHandler::new(
            Arc::clone(&launcher) as Arc<dyn CommandLauncher>,
            Arc::clone(&store) as Arc<dyn InstalledCriteriaStore>,
            DownloadOptions::default(),
        );
        Fixture {
            extensions,
            launcher,
            store,
            handler,
            workflow,
            _dir: dir,
        }
    }

    #[test]
    fn criteria_are_persisted_after_apply() {
        let mut f = setup();
        let result = f.handler.download(&f.extensions, &mut f.workflow);
        assert_eq!(result.code, ResultCode::DownloadSuccess);
        assert!(f.workflow.work_folder().join("install.sh").exists());

        let result = f.handler.install(&f.extensions, &mut f.workflow);
        assert_eq!(result.code, ResultCode::InstallSuccess);
        assert!(f.store.records().is_empty());

        let args = &f.launcher.invocations()[0];
        assert_eq!(&args[..4], ["--update-type", "microsoft/script", "--update-action", "install"]);
        assert!(args.contains(&"--installed-criteria".to_string()));

        let result = f.handler.apply(&f.extensions, &mut f.workflow);
        assert_eq!(result.code, ResultCode::ApplySuccess);
        assert_eq!(f.store.records(), vec!["tool-1.0".to_string()]);
        assert_eq!(
            f.handler.is_installed(&f.extensions, &mut f.workflow).code,
            ResultCode::IsInstalledInstalled
        );
    }

    #[test]
    fn failed_apply_leaves_the_update_not_installed() {
        let mut f = setup();
        f.handler.download(&f.extensions, &mut f.workflow);
        assert!(f.handler.install(&f.extensions, &mut f.workflow).is_success());

        f.launcher.set_exit_code(Some(5));
        let result = f.handler.apply(&f.extensions, &mut f.workflow);

        assert!(result.is_failure());
        assert_eq!(result.extended_code, erc::child_process_exit(5));
        assert!(f.store.records().is_empty());
        assert_eq!(
            f.handler.is_installed(&f.extensions, &mut f.workflow).code,
            ResultCode::IsInstalledNotInstalled
        );
    }

    #[test]
    fn nonzero_exit_is_folded_into_extended_code() {
        let mut f = setup();
        f.handler.download(&f.extensions, &mut f.workflow);
        f.launcher.set_exit_code(Some(3));

        let result = f.handler.install(&f.extensions, &mut f.workflow);
        assert!(result.is_failure());
        assert_eq!(result.extended_code, erc::child_process_exit(3));
        assert!(f.store.records().is_empty());
        assert_eq!(f.workflow.state(), UpdateState::Failed);
    }

    #[test]
    fn signal_and_missing_file_failures() {
        let mut f = setup();
        let result = f.handler.install(&f.extensions, &mut f.workflow);
        assert_eq!(result.extended_code, erc::shell::MISSING_PRIMARY_FILE);
        assert_eq!(f.launcher.launch_count(), 0);

        f.handler.download(&f.extensions, &mut f.workflow);
        f.launcher.set_exit_code(None);
        let result = f.handler.apply(&f.extensions, &mut f.workflow);
        assert_eq!(result.extended_code, erc::shell::TERMINATED_BY_SIGNAL);
    }

    #[test]
    fn installed_update_skips_download() {
        let mut f = setup();
        f.store.persist("tool-1.0").unwrap();
        let result = f.handler.download(&f.extensions, &mut f.workflow);
        assert_eq!(
            result.code,
            ResultCode::DownloadSkippedUpdateAlreadyInstalled
        );
        assert!(!f.workflow.work_folder().join("install.sh").exists());
    }

    #[test]
    fn more_than_one_component_is_rejected() {
        let mut f = setup();
        f.workflow.set_selected_components(Some(json!({
            "components": [{"id": "0"}, {"id": "1"}]
        })));
        let result = f.handler.install(&f.extensions, &mut f.workflow);
        assert_eq!(result.extended_code, erc::shell::TOO_MANY_COMPONENTS);
    }

    #[test]
    fn primary_file_outside_the_work_folder_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manifest = json!({
            "manifestVersion": "5",
            "updateId": {"provider": "Contoso", "name": "Tool", "version": "1.0"},
            "compatibility": [{"deviceManufacturer": "contoso"}],
            "instructions": {"steps": [{
                "handler": "microsoft/script:1",
                "files": [],
                "handlerProperties": {"installedCriteria": "tool-1.0", "scriptFileName": "../../bin/sh"}
            }]},
            "files": {}
        });
        let action = json!({
            "workflow": {"id": "wf-escape", "action": 3},
            "updateManifest": manifest.to_string()
        })
        .to_string();
        let root = Workflow::from_action_json(&action, dir.path()).unwrap();
        let mut step = root.child_from_inline_step(0).unwrap();
        let f = setup();

        let result = f.handler.install(&f.extensions, &mut step);

        assert_eq!(result.extended_code, erc::shell::MISSING_PRIMARY_FILE);
        assert_eq!(f.launcher.launch_count(), 0);
    }

    #[test]
    fn cancel_is_not_supported() {
        let mut f = setup();
        assert_eq!(
            f.handler.cancel(&f.extensions, &mut f.workflow).code,
            ResultCode::CancelUnableToCancel
        );
    }
}
