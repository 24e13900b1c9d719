//! End-to-end runs of the composite handlers over real workflow trees.
//!
//! Leaves are played by the simulator; detached manifests are fetched with
//! the file-copy downloader and components come from an inventory file.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use du_agent_core::{AducResult, ResultCode};
use du_agent_handlers::hash::sha256_base64_bytes;
use du_agent_handlers::{
    translate, ContentHandler, Disposition, DownloadOptions, ExtensionManager, FileCopyDownloader,
    InventoryEnumerator, Operation, SimulatorHandler, StepsHandler, DEFAULT_REF_STEP_HANDLER,
};
use du_agent_workflow::{Interrupts, Workflow};
use serde_json::{json, Value};
use tempfile::TempDir;

const SCRIPT: &str = "microsoft/script:1";

// =============================================================================
// Fixtures
// =============================================================================

fn inline_steps(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "handler": SCRIPT,
                "files": [],
                "handlerProperties": {"installedCriteria": format!("step-{i}")}
            })
        })
        .collect()
}

fn action_json(id: &str, manifest: &Value, file_urls: &Value) -> String {
    json!({
        "workflow": {"id": id, "action": 3},
        "updateManifest": manifest.to_string(),
        "fileUrls": file_urls
    })
    .to_string()
}

fn steps_workflow(dir: &Path, steps: usize) -> Workflow {
    let manifest = json!({
        "manifestVersion": "5",
        "updateId": {"provider": "Contoso", "name": "Toaster", "version": "2.0"},
        "compatibility": [{"deviceManufacturer": "contoso", "deviceModel": "toaster"}],
        "instructions": {"steps": inline_steps(steps)},
        "files": {}
    });
    Workflow::from_action_json(&action_json("wf-e2e", &manifest, &json!({})), dir).unwrap()
}

struct Fixture {
    extensions: ExtensionManager,
    simulator: Arc<SimulatorHandler>,
    handler: StepsHandler,
    dir: TempDir,
}

fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let extensions = ExtensionManager::new();
    let simulator = Arc::new(SimulatorHandler::new());
    extensions.set_handler(SCRIPT, Arc::clone(&simulator) as Arc<dyn ContentHandler>);
    extensions.set_handler(
        DEFAULT_REF_STEP_HANDLER,
        Arc::new(StepsHandler::default()) as Arc<dyn ContentHandler>,
    );
    extensions.set_content_downloader(Arc::new(FileCopyDownloader::new()));
    Fixture {
        extensions,
        simulator,
        handler: StepsHandler::new(DownloadOptions::default()),
        dir,
    }
}

fn installed(simulator: &SimulatorHandler) -> Vec<String> {
    simulator
        .calls_of(Operation::Install)
        .into_iter()
        .filter_map(|c| c.installed_criteria)
        .collect()
}

/// Raises the shared cancel flag from inside its own install.
struct CancellingHandler;

impl ContentHandler for CancellingHandler {
    fn download(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::DownloadSuccess)
    }

    fn install(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        workflow.request_cancel();
        AducResult::from_code(ResultCode::InstallSuccess)
    }

    fn apply(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::ApplySuccess)
    }

    fn cancel(&self, _extensions: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
        workflow.request_cancel();
        AducResult::from_code(ResultCode::CancelSuccess)
    }

    fn is_installed(&self, _extensions: &ExtensionManager, _workflow: &mut Workflow) -> AducResult {
        AducResult::from_code(ResultCode::IsInstalledNotInstalled)
    }
}

// =============================================================================
// Reboot requests
// =============================================================================

#[test]
fn deferred_reboot_lets_later_steps_run() {
    let f = setup();
    f.simulator
        .set_result_for("step-1", Operation::Install, ResultCode::InstallRequiredReboot);
    let mut workflow = steps_workflow(f.dir.path(), 3);

    let result = f.handler.install(&f.extensions, &mut workflow);

    assert_eq!(result.code, ResultCode::InstallSuccess);
    assert_eq!(installed(&f.simulator), ["step-0", "step-1", "step-2"]);
    assert!(workflow.interrupts().reboot);
    assert!(!workflow.interrupts().immediate_reboot);
}

#[test]
fn immediate_reboot_stops_before_later_steps() {
    let f = setup();
    f.simulator.set_result_for(
        "step-1",
        Operation::Install,
        ResultCode::InstallRequiredImmediateReboot,
    );
    let mut workflow = steps_workflow(f.dir.path(), 3);

    let result = f.handler.install(&f.extensions, &mut workflow);

    assert_eq!(result.code, ResultCode::InstallRequiredImmediateReboot);
    assert_eq!(installed(&f.simulator), ["step-0", "step-1"]);
    assert!(workflow.interrupts().immediate_reboot);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn cancel_before_install_runs_nothing() {
    let f = setup();
    let mut workflow = steps_workflow(f.dir.path(), 2);

    let cancelled = f.handler.cancel(&f.extensions, &mut workflow);
    let result = f.handler.install(&f.extensions, &mut workflow);

    assert_eq!(cancelled.code, ResultCode::CancelSuccess);
    assert_eq!(result, AducResult::cancelled());
    assert!(f.simulator.calls().is_empty());
}

#[test]
fn cancel_raised_by_a_step_stops_its_siblings() {
    let f = setup();
    let mut workflow = steps_workflow(f.dir.path(), 3);
    f.extensions
        .set_handler(SCRIPT, Arc::new(CancellingHandler) as Arc<dyn ContentHandler>);

    let result = f.handler.install(&f.extensions, &mut workflow);

    assert_eq!(result, AducResult::cancelled());
    assert!(workflow.is_cancel_requested());
    assert_eq!(workflow.child(1).unwrap().result(), AducResult::default());
}

// =============================================================================
// IsInstalled
// =============================================================================

#[test]
fn is_installed_is_idempotent() {
    let f = setup();
    f.simulator
        .set_result(Operation::IsInstalled, ResultCode::IsInstalledInstalled);
    let mut workflow = steps_workflow(f.dir.path(), 2);

    let first = f.handler.is_installed(&f.extensions, &mut workflow);
    let children = workflow.child_count();
    let second = f.handler.is_installed(&f.extensions, &mut workflow);

    assert_eq!(first, second);
    assert_eq!(first.code, ResultCode::IsInstalledInstalled);
    assert_eq!(workflow.child_count(), children);
}

// =============================================================================
// Components
// =============================================================================

/// A root with one reference step whose leaf targets the `cameras` group,
/// on a device that only has motors.
fn reference_workflow(dir: &Path) -> Workflow {
    let leaf = json!({
        "manifestVersion": "5",
        "updateId": {"provider": "Contoso", "name": "Cameras", "version": "1.0"},
        "compatibility": [{"group": "cameras"}],
        "instructions": {"steps": inline_steps(1)},
        "files": {}
    })
    .to_string();
    let published = dir.join("published");
    std::fs::create_dir_all(&published).unwrap();
    let leaf_path = published.join("cameras.json");
    std::fs::write(&leaf_path, &leaf).unwrap();

    let manifest = json!({
        "manifestVersion": "5",
        "updateId": {"provider": "Contoso", "name": "Robot", "version": "1.0"},
        "compatibility": [{"deviceManufacturer": "contoso", "deviceModel": "robot"}],
        "instructions": {"steps": [{"type": "reference", "detachedManifestFileId": "leaf"}]},
        "files": {
            "leaf": {
                "fileName": "cameras.importmanifest.json",
                "sizeInBytes": leaf.len(),
                "hashes": {"sha256": sha256_base64_bytes(leaf.as_bytes())}
            }
        }
    });
    let urls = json!({"leaf": format!("file://{}", leaf_path.display())});
    Workflow::from_action_json(&action_json("wf-robot", &manifest, &urls), &dir.join("sandbox"))
        .unwrap()
}

fn register_motors_only(f: &Fixture) {
    let inventory = f.dir.path().join("components.json");
    std::fs::write(
        &inventory,
        json!({"components": [{"id": "0", "name": "left-motor", "group": "motors"}]}).to_string(),
    )
    .unwrap();
    f.extensions
        .set_component_enumerator(Arc::new(InventoryEnumerator::new(inventory)));
}

#[test]
fn reference_step_without_matching_components_is_skipped() {
    let f = setup();
    register_motors_only(&f);
    let mut workflow = reference_workflow(f.dir.path());

    let download = f.handler.download(&f.extensions, &mut workflow);
    let install = f.handler.install(&f.extensions, &mut workflow);

    assert_eq!(download.code, ResultCode::DownloadSuccess);
    assert_eq!(install.code, ResultCode::InstallSuccess);
    assert!(workflow.child(0).unwrap().result().code.is_skipped());
    assert!(f.simulator.calls().is_empty());
}

#[test]
fn leaf_without_matching_components_skips_every_phase() {
    let f = setup();
    register_motors_only(&f);
    let mut workflow = reference_workflow(f.dir.path());
    f.handler.download(&f.extensions, &mut workflow);
    let leaf = workflow.child_mut(0).unwrap();
    assert_eq!(leaf.level(), 1);
    let steps = StepsHandler::default();

    assert_eq!(
        steps.download(&f.extensions, leaf).code,
        ResultCode::DownloadSkippedNoMatchingComponents
    );
    assert_eq!(
        steps.install(&f.extensions, leaf).code,
        ResultCode::InstallSkippedNoMatchingComponents
    );
    assert_eq!(
        steps.is_installed(&f.extensions, leaf).code,
        ResultCode::IsInstalledInstalled
    );
    assert!(f.simulator.calls().is_empty());
}

// =============================================================================
// Translation and registry
// =============================================================================

#[test]
fn translation_table() {
    use ResultCode as R;

    const NONE: Interrupts = Interrupts {
        immediate_reboot: false,
        reboot: false,
        immediate_agent_restart: false,
        agent_restart: false,
    };
    const IMMEDIATE_REBOOT: Interrupts = Interrupts {
        immediate_reboot: true,
        ..NONE
    };
    const REBOOT: Interrupts = Interrupts {
        reboot: true,
        ..NONE
    };
    const IMMEDIATE_RESTART: Interrupts = Interrupts {
        immediate_agent_restart: true,
        ..NONE
    };
    const RESTART: Interrupts = Interrupts {
        agent_restart: true,
        ..NONE
    };

    // (child code, parent flags, loop, surfaced code)
    let table = [
        (R::InstallRequiredImmediateReboot, IMMEDIATE_REBOOT, Disposition::Abort, R::InstallRequiredImmediateReboot),
        (R::ApplyRequiredImmediateReboot, IMMEDIATE_REBOOT, Disposition::Abort, R::InstallRequiredImmediateReboot),
        (R::InstallRequiredReboot, REBOOT, Disposition::Proceed, R::InstallRequiredReboot),
        (R::ApplyRequiredReboot, REBOOT, Disposition::Proceed, R::InstallRequiredReboot),
        (R::InstallRequiredImmediateAgentRestart, IMMEDIATE_RESTART, Disposition::Abort, R::InstallRequiredImmediateAgentRestart),
        (R::ApplyRequiredImmediateAgentRestart, IMMEDIATE_RESTART, Disposition::Abort, R::InstallRequiredImmediateAgentRestart),
        (R::InstallRequiredAgentRestart, RESTART, Disposition::Proceed, R::InstallRequiredAgentRestart),
        (R::ApplyRequiredAgentRestart, RESTART, Disposition::Proceed, R::InstallRequiredAgentRestart),
        (R::InstallSkippedUpdateAlreadyInstalled, NONE, Disposition::NextSibling, R::InstallSkippedUpdateAlreadyInstalled),
        (R::InstallSkippedNoMatchingComponents, NONE, Disposition::NextSibling, R::InstallSkippedNoMatchingComponents),
        (R::InstallSuccess, NONE, Disposition::Proceed, R::InstallSuccess),
        (R::Failure, NONE, Disposition::Abort, R::Failure),
    ];

    for (code, flags, disposition, surfaced) in table {
        let t = translate(AducResult::new(code, 7), Interrupts::default());
        assert_eq!(t.interrupts, flags, "{code:?}");
        assert_eq!(t.disposition, disposition, "{code:?}");
        assert_eq!(t.result.code, surfaced, "{code:?}");
        assert_eq!(t.result.extended_code, 7, "{code:?}");
        assert_eq!(translate(AducResult::new(code, 7), Interrupts::default()), t);
    }
}

#[test]
fn concurrent_loads_instantiate_once() {
    let extensions = Arc::new(ExtensionManager::new());
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    extensions.register_handler(SCRIPT, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatorHandler::new()) as Arc<dyn ContentHandler>)
    });

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let extensions = Arc::clone(&extensions);
            std::thread::spawn(move || extensions.load_handler(SCRIPT).unwrap())
        })
        .collect();
    let handlers: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(handlers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}
