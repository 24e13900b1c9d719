//! A scripted leaf handler.
//!
//! The simulator performs no device changes. Each operation returns a
//! configured result, optionally overridden per installed-criteria string so
//! that several nodes sharing one handler instance can behave differently.
//! Every call is recorded for inspection.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use du_agent_core::{AducResult, ResultCode, UpdateState};
use du_agent_workflow::Workflow;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::ContentHandler;
use crate::registry::ExtensionManager;

/// A handler operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// [`ContentHandler::download`].
    Download,
    /// [`ContentHandler::backup`].
    Backup,
    /// [`ContentHandler::install`].
    Install,
    /// [`ContentHandler::apply`].
    Apply,
    /// [`ContentHandler::cancel`].
    Cancel,
    /// [`ContentHandler::is_installed`].
    IsInstalled,
    /// [`ContentHandler::restore`].
    Restore,
}

impl Operation {
    const fn default_code(self) -> ResultCode {
        match self {
            Self::Download => ResultCode::DownloadSuccess,
            Self::Backup => ResultCode::BackupSuccess,
            Self::Install => ResultCode::InstallSuccess,
            Self::Apply => ResultCode::ApplySuccess,
            Self::Cancel => ResultCode::CancelSuccess,
            Self::IsInstalled => ResultCode::IsInstalledNotInstalled,
            Self::Restore => ResultCode::RestoreSuccess,
        }
    }

    const fn success_state(self) -> Option<UpdateState> {
        match self {
            Self::Download => Some(UpdateState::DownloadSucceeded),
            Self::Backup => Some(UpdateState::BackupSucceeded),
            Self::Install => Some(UpdateState::InstallSucceeded),
            Self::Apply | Self::Restore => Some(UpdateState::Idle),
            Self::Cancel | Self::IsInstalled => None,
        }
    }
}

/// Results the simulator returns, as loaded from a script file.
///
/// ```json
/// {
///   "results": { "install": { "resultCode": 606, "extendedResultCode": 0 } },
///   "byInstalledCriteria": {
///     "fw-2.0": { "apply": { "resultCode": 0, "extendedResultCode": 42 } }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorScript {
    /// Results for every node.
    pub results: HashMap<Operation, AducResult>,
    /// Results for nodes with a given installed criteria.
    pub by_installed_criteria: HashMap<String, HashMap<Operation, AducResult>>,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorCall {
    /// Which operation ran.
    pub operation: Operation,
    /// Id of the node it ran on.
    pub workflow_id: String,
    /// The node's installed criteria.
    pub installed_criteria: Option<String>,
    /// The node's selected components.
    pub selected_components: Option<Value>,
}

/// The scripted handler.
#[derive(Debug, Default)]
pub struct SimulatorHandler {
    script: Mutex<SimulatorScript>,
    panics: Mutex<HashSet<Operation>>,
    calls: Mutex<Vec<SimulatorCall>>,
}

impl SimulatorHandler {
    /// A simulator where every operation succeeds and nothing is installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator following `script`.
    #[must_use]
    pub fn with_script(script: SimulatorScript) -> Self {
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Load a script from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let script = serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::with_script(script))
    }

    /// Make `operation` return `result` on every node.
    pub fn set_result(&self, operation: Operation, result: impl Into<AducResult>) {
        self.script.lock().results.insert(operation, result.into());
    }

    /// Make `operation` return `result` on nodes whose installed criteria is
    /// `criteria`.
    pub fn set_result_for(
        &self,
        criteria: impl Into<String>,
        operation: Operation,
        result: impl Into<AducResult>,
    ) {
        self.script
            .lock()
            .by_installed_criteria
            .entry(criteria.into())
            .or_default()
            .insert(operation, result.into());
    }

    /// Make `operation` panic, as a misbehaving extension would.
    pub fn panic_on(&self, operation: Operation) {
        self.panics.lock().insert(operation);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<SimulatorCall> {
        self.calls.lock().clone()
    }

    /// Calls of one operation, in order.
    #[must_use]
    pub fn calls_of(&self, operation: Operation) -> Vec<SimulatorCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    fn run(&self, operation: Operation, workflow: &mut Workflow) -> AducResult {
        self.calls.lock().push(SimulatorCall {
            operation,
            workflow_id: workflow.id().to_string(),
            installed_criteria: workflow.installed_criteria().map(str::to_string),
            selected_components: workflow.selected_components().cloned(),
        });

        if self.panics.lock().contains(&operation) {
            panic!("simulated {operation:?} panic");
        }

        let result = {
            let script = self.script.lock();
            workflow
                .installed_criteria()
                .and_then(|c| script.by_installed_criteria.get(c))
                .and_then(|r| r.get(&operation))
                .or_else(|| script.results.get(&operation))
                .copied()
                .unwrap_or_else(|| AducResult::from_code(operation.default_code()))
        };

        tracing::debug!(
            workflow_id = %workflow.id(),
            operation = ?operation,
            result = %result,
            "Simulated operation"
        );

        if let Some(state) = operation.success_state() {
            workflow.record(result, state);
        }
        result
    }
}

impl ContentHandler for SimulatorHandler {
    fn download(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run(Operation::Download, workflow)
    }

    fn backup(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run(Operation::Backup, workflow)
    }

    fn install(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run(Operation::Install, workflow)
    }

    fn apply(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run(Operation::Apply, workflow)
    }

    fn cancel(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        let result = self.run(Operation::Cancel, workflow);
        if result.code == ResultCode::CancelSuccess {
            workflow.request_cancel();
        }
        result
    }

    fn is_installed(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run(Operation::IsInstalled, workflow)
    }

    fn restore(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        self.run(Operation::Restore, workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_parses_from_json() {
        let script: SimulatorScript = serde_json::from_str(
            r#"{
                "results": {"install": {"resultCode": 606, "extendedResultCode": 0}},
                "byInstalledCriteria": {
                    "fw-2.0": {"apply": {"resultCode": 0, "extendedResultCode": 42}}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            script.results[&Operation::Install].code,
            ResultCode::InstallRequiredReboot
        );
        assert_eq!(
            script.by_installed_criteria["fw-2.0"][&Operation::Apply],
            AducResult::failure(42)
        );
    }

    #[test]
    fn defaults_succeed_and_report_not_installed() {
        assert_eq!(
            Operation::IsInstalled.default_code(),
            ResultCode::IsInstalledNotInstalled
        );
        assert_eq!(Operation::Install.default_code(), ResultCode::InstallSuccess);
        assert_eq!(Operation::Cancel.success_state(), None);
    }
}
