//! End-to-end deployments through the default registrations in simulation
//! mode.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use du_agent::{
    setup, AgentConfig, DeploymentOutcome, Driver, NoopSystemActions, StateReport, StateReporter,
};
use du_agent_core::{ResultCode, UpdateState};
use du_agent_handlers::{CommandLauncher, ProcessLauncher};
use du_agent_store::{InstalledCriteriaStore, JsonFileStore};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tokio::runtime::Handle;

#[derive(Default)]
struct CollectingReporter {
    reports: Mutex<Vec<StateReport>>,
}

#[async_trait]
impl StateReporter for CollectingReporter {
    async fn report(&self, report: StateReport) {
        self.reports.lock().push(report);
    }
}

fn action(workflow_id: &str) -> String {
    let steps: Vec<_> = ["fw-1.0", "app-2.0"]
        .iter()
        .map(|criteria| {
            json!({
                "handler": "microsoft/script:1",
                "files": [],
                "handlerProperties": {"installedCriteria": criteria}
            })
        })
        .collect();
    let manifest = json!({
        "manifestVersion": "5",
        "updateId": {"provider": "Contoso", "name": "Toaster", "version": "2.0"},
        "compatibility": [{"deviceManufacturer": "contoso"}],
        "instructions": {"steps": steps},
        "files": {}
    });
    json!({
        "workflow": {"id": workflow_id, "action": 3},
        "updateManifest": manifest.to_string()
    })
    .to_string()
}

fn driver(dir: &Path, script: Option<serde_json::Value>) -> (Driver, Arc<CollectingReporter>) {
    let simulator_script = script.map(|script| {
        let path = dir.join("simulator.json");
        std::fs::write(&path, script.to_string()).unwrap();
        path
    });
    let config = AgentConfig {
        sandbox_root: dir.join("downloads"),
        installed_criteria_file: dir.join("installedcriteria"),
        simulate: true,
        simulator_script,
        ..AgentConfig::default()
    };
    let store: Arc<dyn InstalledCriteriaStore> =
        Arc::new(JsonFileStore::new(config.installed_criteria_file.clone()));
    let launcher: Arc<dyn CommandLauncher> = Arc::new(ProcessLauncher::new("/bin/false"));
    let extensions = setup::build_extensions(&config, &store, &launcher, Handle::current()).unwrap();

    let reporter = Arc::new(CollectingReporter::default());
    let driver = Driver::new(
        Arc::new(extensions),
        Arc::new(NoopSystemActions),
        Arc::clone(&reporter) as Arc<dyn StateReporter>,
        config,
    );
    (driver, reporter)
}

#[tokio::test]
async fn simulated_deployment_succeeds() {
    let dir = TempDir::new().unwrap();
    let (driver, reporter) = driver(dir.path(), None);

    let outcome = driver.run_deployment(&action("wf-e2e")).await.unwrap();

    assert!(matches!(
        outcome,
        DeploymentOutcome::Finished {
            state: UpdateState::Idle,
            ..
        }
    ));
    let last = reporter.reports.lock().last().cloned().unwrap();
    assert_eq!(last.result.code, ResultCode::ApplySuccess);
    assert_eq!(last.installed_update_id.as_deref(), Some("Contoso/Toaster:2.0"));
    assert!(!dir.path().join("downloads/wf-e2e").exists());
}

#[tokio::test]
async fn scripted_failure_surfaces_its_extended_code() {
    let dir = TempDir::new().unwrap();
    let script = json!({
        "byInstalledCriteria": {
            "app-2.0": {"install": {"resultCode": 0, "extendedResultCode": 1234}}
        }
    });
    let (driver, reporter) = driver(dir.path(), Some(script));

    let outcome = driver.run_deployment(&action("wf-e2e")).await.unwrap();

    let DeploymentOutcome::Finished { result, .. } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(result.code, ResultCode::Failure);
    assert_eq!(result.extended_code, 1234);
    let states: Vec<_> = reporter.reports.lock().iter().map(|r| r.state).collect();
    assert!(states.contains(&UpdateState::RestoreStarted));
    assert!(driver.installed_update_id().is_none());
}

#[tokio::test]
async fn installed_update_is_not_processed_again() {
    let dir = TempDir::new().unwrap();
    let script = json!({
        "results": {"isInstalled": {"resultCode": 900, "extendedResultCode": 0}}
    });
    let (driver, _) = driver(dir.path(), Some(script));

    let outcome = driver.run_deployment(&action("wf-e2e")).await.unwrap();

    assert_eq!(outcome, DeploymentOutcome::AlreadyInstalled);
    assert_eq!(
        driver.installed_update_id().as_deref(),
        Some("Contoso/Toaster:2.0")
    );
}
