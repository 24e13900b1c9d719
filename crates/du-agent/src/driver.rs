//! The deployment driver.
//!
//! Owns the top-level workflow, walks it through the step table in
//! [`crate::lifecycle`] and acts on the reboot and restart requests it raises.
//!
//! Each step runs on a blocking worker via [`Driver::start_phase`], which
//! hands the finished workflow back through a completion callback. At most
//! one step is in flight at a time.

use std::sync::Arc;

use du_agent_core::{erc, AducResult, ResultCode, UpdateState};
use du_agent_handlers::handler::{check_installed, reports_installed};
use du_agent_handlers::{guarded, translate, ContentHandler, ExtensionManager};
use du_agent_workflow::{sandbox, CancelToken, Interrupts, UpdateAction, UpdateActionDocument, Workflow};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::lifecycle::{self, WorkflowStep};
use crate::reporter::{StateReport, StateReporter};
use crate::setup::MANIFEST_HANDLER;
use crate::system::SystemActions;

/// How a deployment request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// The workflow was already processed.
    Ignored,
    /// The update is already on the device; nothing ran.
    AlreadyInstalled,
    /// The request was a cancel action.
    CancelRequested {
        /// Whether a deployment was running.
        in_flight: bool,
    },
    /// The deployment was cancelled during `step`.
    Cancelled {
        /// The step that observed the cancellation.
        step: WorkflowStep,
    },
    /// An immediate reboot or agent restart stopped the deployment after
    /// `step`.
    Interrupted {
        /// The step that asked for the interruption.
        step: WorkflowStep,
        /// Its result.
        result: AducResult,
    },
    /// The step table ran to its end.
    Finished {
        /// The first failure, or the result of the last step.
        result: AducResult,
        /// The final reported state.
        state: UpdateState,
    },
}

/// A finished step, delivered to the completion callback.
#[derive(Debug)]
pub struct PhaseCompletion {
    /// The step that ran.
    pub step: WorkflowStep,
    /// Its result.
    pub result: AducResult,
    /// The workflow, handed back to the caller.
    pub workflow: Workflow,
}

#[derive(Debug)]
struct Deployment {
    workflow_id: String,
    cancel: CancelToken,
}

#[derive(Debug, Default)]
struct DriverState {
    current: Option<Deployment>,
    in_progress: Option<WorkflowStep>,
    last_completed: Option<(String, Option<String>)>,
    installed_update_id: Option<String>,
}

/// Drives deployments through download, install and apply.
pub struct Driver {
    extensions: Arc<ExtensionManager>,
    system: Arc<dyn SystemActions>,
    reporter: Arc<dyn StateReporter>,
    config: AgentConfig,
    state: Arc<Mutex<DriverState>>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("extensions", &self.extensions)
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Create a driver.
    #[must_use]
    pub fn new(
        extensions: Arc<ExtensionManager>,
        system: Arc<dyn SystemActions>,
        reporter: Arc<dyn StateReporter>,
        config: AgentConfig,
    ) -> Self {
        Self {
            extensions,
            system,
            reporter,
            config,
            state: Arc::new(Mutex::new(DriverState::default())),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The update id last found or made installed.
    #[must_use]
    pub fn installed_update_id(&self) -> Option<String> {
        self.state.lock().installed_update_id.clone()
    }

    /// The step currently in flight.
    #[must_use]
    pub fn current_step(&self) -> Option<WorkflowStep> {
        self.state.lock().in_progress
    }

    /// Returns true while a deployment is being processed.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Unload every handler. Called on shutdown.
    pub fn shutdown(&self) {
        self.extensions.unload_all();
    }

    // =========================================================================
    // Handler selection
    // =========================================================================

    /// Resolve the handler for the top level of `workflow`.
    ///
    /// A registered manifest `updateType` wins. Otherwise the manifest
    /// version selects `microsoft/update-manifest:<N>`, falling back to
    /// `microsoft/update-manifest`.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::NoHandler` if none of the candidates loads.
    pub fn top_level_handler(&self, workflow: &Workflow) -> Result<(String, Arc<dyn ContentHandler>)> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(update_type) = workflow.update_type() {
            if self.extensions.is_registered(update_type) {
                candidates.push(update_type.to_string());
            }
        }
        if let Ok(version) = workflow.manifest().version() {
            candidates.push(format!("{MANIFEST_HANDLER}:{version}"));
        }
        candidates.push(MANIFEST_HANDLER.to_string());

        let mut last_error = None;
        for update_type in candidates {
            match self.extensions.load_handler(&update_type) {
                Ok(handler) => {
                    tracing::debug!(workflow_id = %workflow.id(), update_type, "Top-level handler");
                    return Ok((update_type, handler));
                }
                Err(source) => last_error = Some((update_type, source)),
            }
        }
        let (update_type, source) = last_error.ok_or_else(|| {
            AgentError::Worker("no top-level handler candidates".to_string())
        })?;
        Err(AgentError::NoHandler {
            update_type,
            source,
        })
    }

    // =========================================================================
    // Phases
    // =========================================================================

    /// Run `step` of `workflow` on a blocking worker. `on_complete` receives
    /// the result and the workflow once the step is done.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::PhaseInProgress` if another step is in flight.
    pub fn start_phase<F>(
        &self,
        step: WorkflowStep,
        handler: Arc<dyn ContentHandler>,
        mut workflow: Workflow,
        on_complete: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnOnce(PhaseCompletion) + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if let Some(running) = state.in_progress {
                return Err(AgentError::PhaseInProgress {
                    requested: step,
                    running,
                });
            }
            state.in_progress = Some(step);
        }

        let extensions = Arc::clone(&self.extensions);
        let state = Arc::clone(&self.state);
        Ok(tokio::task::spawn_blocking(move || {
            let result = execute_step(step, handler.as_ref(), &extensions, &mut workflow);
            state.lock().in_progress = None;
            on_complete(PhaseCompletion {
                step,
                result,
                workflow,
            });
        }))
    }

    async fn run_phase(
        &self,
        step: WorkflowStep,
        handler: &Arc<dyn ContentHandler>,
        workflow: Workflow,
    ) -> Result<PhaseCompletion> {
        let (tx, rx) = oneshot::channel();
        let worker = self.start_phase(step, Arc::clone(handler), workflow, move |completion| {
            // The receiver only goes away if the driver itself was dropped.
            let _ = tx.send(completion);
        })?;
        match rx.await {
            Ok(completion) => Ok(completion),
            Err(_) => {
                self.state.lock().in_progress = None;
                let reason = match worker.await {
                    Err(e) => e.to_string(),
                    Ok(()) => "completion was not delivered".to_string(),
                };
                Err(AgentError::Worker(reason))
            }
        }
    }

    // =========================================================================
    // Deployments
    // =========================================================================

    /// Process an update action document.
    ///
    /// A cancel action trips the running deployment's cancel token. A
    /// deployment action runs the whole step table and returns once it ends.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::PhaseInProgress` if a deployment is already
    /// running, `AgentError::Workflow` if the action or manifest is invalid,
    /// and `AgentError::NoHandler` if no top-level handler can be resolved.
    pub async fn run_deployment(&self, action_json: &str) -> Result<DeploymentOutcome> {
        let doc = UpdateActionDocument::parse(action_json)?;
        if doc.action() == UpdateAction::Cancel {
            let in_flight = self.cancel();
            return Ok(DeploymentOutcome::CancelRequested { in_flight });
        }

        let key = (doc.workflow.id.clone(), doc.workflow.retry_timestamp.clone());
        let prepared = self.prepare(doc);
        {
            let mut state = self.state.lock();
            if state.current.is_some() {
                return Err(AgentError::PhaseInProgress {
                    requested: WorkflowStep::ProcessDeployment,
                    running: state.in_progress.unwrap_or(WorkflowStep::ProcessDeployment),
                });
            }
            if state.last_completed.as_ref() == Some(&key) {
                tracing::info!(workflow_id = %key.0, "Workflow already processed, ignoring");
                return Ok(DeploymentOutcome::Ignored);
            }
            match &prepared {
                Ok((workflow, _)) => {
                    state.current = Some(Deployment {
                        workflow_id: key.0.clone(),
                        cancel: workflow.cancel_token(),
                    });
                }
                Err(_) => state.last_completed = Some(key.clone()),
            }
        }

        let (workflow, handler) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(workflow_id = %key.0, error = %e, "Cannot start deployment");
                self.reporter
                    .report(StateReport {
                        workflow_id: key.0,
                        state: UpdateState::Failed,
                        result: AducResult::failure(e.extended_code()),
                        details: e.to_string(),
                        installed_update_id: None,
                    })
                    .await;
                return Err(e);
            }
        };

        tracing::info!(
            workflow_id = %key.0,
            update_id = %workflow.expected_update_id(),
            "Processing deployment"
        );
        let outcome = self.drive(workflow, &handler).await;

        let mut state = self.state.lock();
        state.current = None;
        state.last_completed = Some(key);
        outcome
    }

    /// Trip the cancel token of the running deployment. Returns false if
    /// nothing is running.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock();
        match &state.current {
            Some(deployment) => {
                tracing::info!(
                    workflow_id = %deployment.workflow_id,
                    step = ?state.in_progress,
                    "Cancel requested"
                );
                deployment.cancel.cancel();
                true
            }
            None => {
                tracing::info!("Cancel requested with no deployment running");
                false
            }
        }
    }

    fn prepare(&self, doc: UpdateActionDocument) -> Result<(Workflow, Arc<dyn ContentHandler>)> {
        let workflow = Workflow::from_action(doc, &self.config.sandbox_root)?;
        workflow.manifest().ensure_supported()?;
        let (_, handler) = self.top_level_handler(&workflow)?;
        Ok((workflow, handler))
    }

    async fn drive(
        &self,
        workflow: Workflow,
        handler: &Arc<dyn ContentHandler>,
    ) -> Result<DeploymentOutcome> {
        let (installed, mut workflow) = self.check_installed(handler, workflow).await?;
        if installed {
            let update_id = workflow.expected_update_id().to_string();
            tracing::info!(workflow_id = %workflow.id(), update_id, "Update already installed");
            workflow.set_installed_update_id(update_id.clone());
            self.state.lock().installed_update_id = Some(update_id.clone());
            self.report(
                &workflow,
                UpdateState::Idle,
                AducResult::from_code(ResultCode::Success),
                Some(update_id),
            )
            .await;
            return Ok(DeploymentOutcome::AlreadyInstalled);
        }

        let mut step = WorkflowStep::ProcessDeployment;
        let mut failure: Option<AducResult> = None;
        let mut interrupts = Interrupts::default();
        loop {
            if let Some(started) = step.started_state() {
                workflow.set_state(started);
                self.report(
                    &workflow,
                    started,
                    AducResult::from_code(step.in_progress_code()),
                    None,
                )
                .await;
            }

            let completion = self.run_phase(step, handler, workflow).await?;
            workflow = completion.workflow;
            let result = completion.result;

            if result.code == ResultCode::FailureCancelled {
                tracing::info!(workflow_id = %workflow.id(), ?step, "Deployment cancelled");
                workflow.set_state(UpdateState::Idle);
                self.report(&workflow, UpdateState::Idle, result, None).await;
                sandbox::destroy(workflow.work_folder());
                return Ok(DeploymentOutcome::Cancelled { step });
            }

            let succeeded = result.is_success();
            let entry = lifecycle::entry(step);
            let state = entry.state_for(succeeded);
            if !succeeded {
                tracing::error!(workflow_id = %workflow.id(), ?step, result = %result, "Step failed");
                failure.get_or_insert(result);
            }

            let mut installed_update_id = None;
            if step == WorkflowStep::Apply && succeeded {
                let update_id = workflow.expected_update_id().to_string();
                workflow.set_installed_update_id(update_id.clone());
                self.state.lock().installed_update_id = Some(update_id.clone());
                installed_update_id = Some(update_id);
            }

            workflow.set_state(state);
            let reported = failure.filter(|_| step == WorkflowStep::Restore).unwrap_or(result);
            self.report(&workflow, state, reported, installed_update_id).await;

            if step.honors_interrupts() {
                interrupts = interrupts.merge(translate(result, workflow.interrupts()).interrupts);
                if interrupts.immediate() {
                    tracing::warn!(workflow_id = %workflow.id(), ?step, ?interrupts, "Immediate interruption requested");
                    self.act_on(interrupts).await;
                    return Ok(DeploymentOutcome::Interrupted { step, result });
                }
            }

            match entry.next_for(succeeded) {
                Some(next) => step = next,
                None => {
                    sandbox::destroy(workflow.work_folder());
                    self.act_on(interrupts).await;
                    return Ok(DeploymentOutcome::Finished {
                        result: failure.unwrap_or(result),
                        state,
                    });
                }
            }
        }
    }

    async fn check_installed(
        &self,
        handler: &Arc<dyn ContentHandler>,
        mut workflow: Workflow,
    ) -> Result<(bool, Workflow)> {
        let handler = Arc::clone(handler);
        let extensions = Arc::clone(&self.extensions);
        tokio::task::spawn_blocking(move || {
            let result = check_installed(handler.as_ref(), &extensions, &mut workflow);
            tracing::debug!(workflow_id = %workflow.id(), result = %result, "IsInstalled");
            (reports_installed(result), workflow)
        })
        .await
        .map_err(|e| AgentError::Worker(e.to_string()))
    }

    async fn act_on(&self, interrupts: Interrupts) {
        let outcome = if interrupts.reboot_requested() {
            self.system.reboot().await
        } else if interrupts.agent_restart_requested() {
            self.system.restart_agent().await
        } else {
            return;
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "System action failed");
        }
    }

    async fn report(
        &self,
        workflow: &Workflow,
        state: UpdateState,
        result: AducResult,
        installed_update_id: Option<String>,
    ) {
        self.reporter
            .report(StateReport {
                workflow_id: workflow.id().to_string(),
                state,
                result,
                details: workflow.result_details().to_string(),
                installed_update_id,
            })
            .await;
    }
}

/// Run one step on the calling thread.
fn execute_step(
    step: WorkflowStep,
    handler: &dyn ContentHandler,
    extensions: &ExtensionManager,
    workflow: &mut Workflow,
) -> AducResult {
    tracing::info!(workflow_id = %workflow.id(), ?step, "Step started");
    let code = erc::platform::HANDLER_UNKNOWN_EXCEPTION;
    let result = match step {
        WorkflowStep::ProcessDeployment => match sandbox::create(workflow.work_folder()) {
            Ok(()) => AducResult::from_code(ResultCode::DeploymentInProgressSuccess),
            Err(e) => {
                workflow.set_result_details(e.to_string());
                AducResult::failure(e.extended_code())
            }
        },
        WorkflowStep::Download => guarded(code, || handler.download(extensions, workflow)),
        WorkflowStep::Backup => guarded(code, || handler.backup(extensions, workflow)),
        WorkflowStep::Install => guarded(code, || handler.install(extensions, workflow)),
        WorkflowStep::Apply => guarded(code, || handler.apply(extensions, workflow)),
        WorkflowStep::Restore => guarded(code, || handler.restore(extensions, workflow)),
    };

    // Restore still runs to completion after a cancel.
    if step != WorkflowStep::Restore && workflow.is_cancel_requested() {
        return AducResult::cancelled();
    }
    tracing::info!(workflow_id = %workflow.id(), ?step, result = %result, "Step finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::mock::RecordingReporter;
    use crate::setup::register_composites;
    use crate::system::mock::{RecordingSystemActions, SystemAction};
    use du_agent_handlers::{DownloadOptions, Operation, SimulatorHandler};
    use du_agent_store::mock::MockCriteriaStore;
    use du_agent_store::InstalledCriteriaStore;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const SCRIPT: &str = "microsoft/script:1";

    fn action(workflow_id: &str, steps: usize) -> String {
        let steps: Vec<Value> = (0..steps)
            .map(|i| {
                json!({
                    "handler": SCRIPT,
                    "files": [],
                    "handlerProperties": {"installedCriteria": format!("step-{i}")}
                })
            })
            .collect();
        let manifest = json!({
            "manifestVersion": "5",
            "updateId": {"provider": "Contoso", "name": "Toaster", "version": "1.0"},
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

    struct Fixture {
        driver: Arc<Driver>,
        simulator: Arc<SimulatorHandler>,
        reporter: Arc<RecordingReporter>,
        system: Arc<RecordingSystemActions>,
        dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn InstalledCriteriaStore> = Arc::new(MockCriteriaStore::new());
        let extensions = ExtensionManager::new();
        register_composites(&extensions, &store, DownloadOptions::default());
        let simulator = Arc::new(SimulatorHandler::new());
        extensions.set_handler(SCRIPT, Arc::clone(&simulator) as Arc<dyn ContentHandler>);

        let reporter = Arc::new(RecordingReporter::new());
        let system = Arc::new(RecordingSystemActions::new());
        let config = AgentConfig {
            sandbox_root: dir.path().to_path_buf(),
            ..AgentConfig::default()
        };
        let driver = Arc::new(Driver::new(
            Arc::new(extensions),
            Arc::clone(&system) as Arc<dyn SystemActions>,
            Arc::clone(&reporter) as Arc<dyn StateReporter>,
            config,
        ));
        Fixture {
            driver,
            simulator,
            reporter,
            system,
            dir,
        }
    }

    #[tokio::test]
    async fn deployment_walks_the_step_table() {
        let f = setup();

        let outcome = f.driver.run_deployment(&action("wf-1", 2)).await.unwrap();

        assert_eq!(
            outcome,
            DeploymentOutcome::Finished {
                result: AducResult::from_code(ResultCode::ApplySuccess),
                state: UpdateState::Idle,
            }
        );
        assert_eq!(
            f.reporter.states(),
            [
                UpdateState::DeploymentInProgress,
                UpdateState::DownloadStarted,
                UpdateState::DownloadSucceeded,
                UpdateState::BackupStarted,
                UpdateState::BackupSucceeded,
                UpdateState::InstallStarted,
                UpdateState::InstallSucceeded,
                UpdateState::ApplyStarted,
                UpdateState::Idle,
            ]
        );
        assert_eq!(f.simulator.calls_of(Operation::Install).len(), 2);
        assert_eq!(
            f.driver.installed_update_id().as_deref(),
            Some("Contoso/Toaster:1.0")
        );
        assert!(f.system.requested().is_empty());
        assert!(!f.dir.path().join("wf-1").exists());
        assert!(!f.driver.is_busy());
    }

    #[tokio::test]
    async fn repeated_workflow_id_is_ignored() {
        let f = setup();
        f.driver.run_deployment(&action("wf-1", 1)).await.unwrap();
        let installs = f.simulator.calls_of(Operation::Install).len();

        let outcome = f.driver.run_deployment(&action("wf-1", 1)).await.unwrap();

        assert_eq!(outcome, DeploymentOutcome::Ignored);
        assert_eq!(f.simulator.calls_of(Operation::Install).len(), installs);
    }

    #[tokio::test]
    async fn installed_update_skips_the_workflow() {
        let f = setup();
        f.simulator
            .set_result(Operation::IsInstalled, ResultCode::IsInstalledInstalled);

        let outcome = f.driver.run_deployment(&action("wf-1", 2)).await.unwrap();

        assert_eq!(outcome, DeploymentOutcome::AlreadyInstalled);
        assert!(f.simulator.calls_of(Operation::Download).is_empty());
        assert_eq!(f.reporter.states(), [UpdateState::Idle]);
        assert_eq!(
            f.reporter.reports()[0].installed_update_id.as_deref(),
            Some("Contoso/Toaster:1.0")
        );
    }

    #[tokio::test]
    async fn failed_install_restores() {
        let f = setup();
        let failure = AducResult::failure(42);
        f.simulator.set_result(Operation::Install, failure);

        let outcome = f.driver.run_deployment(&action("wf-1", 2)).await.unwrap();

        assert_eq!(
            outcome,
            DeploymentOutcome::Finished {
                result: failure,
                state: UpdateState::Idle,
            }
        );
        let states = f.reporter.states();
        assert_eq!(
            &states[states.len() - 4..],
            [
                UpdateState::InstallStarted,
                UpdateState::Failed,
                UpdateState::RestoreStarted,
                UpdateState::Idle,
            ]
        );
        assert_eq!(f.reporter.reports().last().unwrap().result, failure);
        assert!(f.driver.installed_update_id().is_none());
    }

    #[tokio::test]
    async fn immediate_reboot_stops_before_apply() {
        let f = setup();
        f.simulator.set_result(
            Operation::Install,
            ResultCode::InstallRequiredImmediateReboot,
        );

        let outcome = f.driver.run_deployment(&action("wf-1", 2)).await.unwrap();

        assert!(matches!(
            outcome,
            DeploymentOutcome::Interrupted {
                step: WorkflowStep::Install,
                ..
            }
        ));
        assert_eq!(f.system.requested(), [SystemAction::Reboot]);
        assert_eq!(f.simulator.calls_of(Operation::Install).len(), 1);
        assert!(!f.reporter.states().contains(&UpdateState::ApplyStarted));
    }

    #[tokio::test]
    async fn deferred_reboot_waits_for_the_end() {
        let f = setup();
        f.simulator
            .set_result_for("step-0", Operation::Install, ResultCode::InstallRequiredReboot);

        let outcome = f.driver.run_deployment(&action("wf-1", 2)).await.unwrap();

        assert!(matches!(
            outcome,
            DeploymentOutcome::Finished {
                state: UpdateState::Idle,
                ..
            }
        ));
        assert_eq!(f.simulator.calls_of(Operation::Install).len(), 2);
        assert_eq!(f.system.requested(), [SystemAction::Reboot]);
    }

    #[tokio::test]
    async fn deferred_restart_restarts_the_agent() {
        let f = setup();
        f.simulator
            .set_result(Operation::Install, ResultCode::InstallRequiredAgentRestart);

        f.driver.run_deployment(&action("wf-1", 1)).await.unwrap();

        assert_eq!(f.system.requested(), [SystemAction::RestartAgent]);
    }

    #[tokio::test]
    async fn cancel_action_without_deployment() {
        let f = setup();
        let cancel = json!({"workflow": {"id": "wf-1", "action": 255}}).to_string();

        let outcome = f.driver.run_deployment(&cancel).await.unwrap();

        assert_eq!(outcome, DeploymentOutcome::CancelRequested { in_flight: false });
    }

    #[tokio::test]
    async fn unsupported_manifest_version_is_reported() {
        let f = setup();
        let manifest = json!({
            "manifestVersion": "3",
            "updateId": {"provider": "Contoso", "name": "Toaster", "version": "1.0"}
        });
        let action = json!({
            "workflow": {"id": "wf-old", "action": 3},
            "updateManifest": manifest.to_string()
        })
        .to_string();

        let err = f.driver.run_deployment(&action).await.unwrap_err();

        assert_eq!(
            err.extended_code(),
            erc::workflow::UNSUPPORTED_UPDATE_MANIFEST_VERSION
        );
        assert_eq!(f.reporter.states(), [UpdateState::Failed]);
        assert!(!f.driver.is_busy());
    }

    #[tokio::test]
    async fn missing_top_level_handler() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let driver = Driver::new(
            Arc::new(ExtensionManager::new()),
            Arc::new(RecordingSystemActions::new()),
            Arc::clone(&reporter) as Arc<dyn StateReporter>,
            AgentConfig {
                sandbox_root: dir.path().to_path_buf(),
                ..AgentConfig::default()
            },
        );

        let err = driver.run_deployment(&action("wf-1", 1)).await.unwrap_err();

        assert!(matches!(err, AgentError::NoHandler { ref update_type, .. } if update_type == MANIFEST_HANDLER));
        assert_eq!(err.extended_code(), erc::platform::NO_UPDATE_MANIFEST_HANDLER);
        assert_eq!(reporter.reports()[0].result.extended_code, err.extended_code());
    }

    #[tokio::test]
    async fn declared_update_type_selects_the_handler() {
        let f = setup();
        let manifest = json!({
            "manifestVersion": "4",
            "updateId": {"provider": "Contoso", "name": "Tool", "version": "2.0"},
            "updateType": SCRIPT,
            "installedCriteria": "tool-2.0"
        });
        let action = json!({
            "workflow": {"id": "wf-leaf", "action": 3},
            "updateManifest": manifest.to_string()
        })
        .to_string();
        let workflow = Workflow::from_action_json(&action, f.dir.path()).unwrap();

        let (update_type, _) = f.driver.top_level_handler(&workflow).unwrap();

        assert_eq!(update_type, SCRIPT);
    }

    /// Blocks in download until released, so a test can act mid-phase.
    struct GateHandler {
        entered: Mutex<Option<oneshot::Sender<()>>>,
        release: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl ContentHandler for GateHandler {
        fn download(&self, _: &ExtensionManager, _: &mut Workflow) -> AducResult {
            if let Some(entered) = self.entered.lock().take() {
                entered.send(()).unwrap();
            }
            if let Some(release) = self.release.lock().take() {
                release.recv().unwrap();
            }
            AducResult::from_code(ResultCode::DownloadSuccess)
        }

        fn install(&self, _: &ExtensionManager, _: &mut Workflow) -> AducResult {
            AducResult::from_code(ResultCode::InstallSuccess)
        }

        fn apply(&self, _: &ExtensionManager, _: &mut Workflow) -> AducResult {
            AducResult::from_code(ResultCode::ApplySuccess)
        }

        fn cancel(&self, _: &ExtensionManager, workflow: &mut Workflow) -> AducResult {
            workflow.request_cancel();
            AducResult::from_code(ResultCode::CancelSuccess)
        }

        fn is_installed(&self, _: &ExtensionManager, _: &mut Workflow) -> AducResult {
            AducResult::from_code(ResultCode::IsInstalledNotInstalled)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn busy_driver_rejects_and_cancels_mid_phase() {
        let dir = TempDir::new().unwrap();
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let gate = Arc::new(GateHandler {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let extensions = ExtensionManager::new();
        extensions.set_handler("microsoft/update-manifest:5", gate as Arc<dyn ContentHandler>);
        let reporter = Arc::new(RecordingReporter::new());
        let driver = Arc::new(Driver::new(
            Arc::new(extensions),
            Arc::new(RecordingSystemActions::new()),
            Arc::clone(&reporter) as Arc<dyn StateReporter>,
            AgentConfig {
                sandbox_root: dir.path().to_path_buf(),
                ..AgentConfig::default()
            },
        ));

        let running = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.run_deployment(&action("wf-1", 1)).await })
        };
        entered_rx.await.unwrap();
        assert_eq!(driver.current_step(), Some(WorkflowStep::Download));

        let err = driver.run_deployment(&action("wf-2", 1)).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::PhaseInProgress {
                running: WorkflowStep::Download,
                ..
            }
        ));

        let cancel = json!({"workflow": {"id": "wf-1", "action": 255}}).to_string();
        assert_eq!(
            driver.run_deployment(&cancel).await.unwrap(),
            DeploymentOutcome::CancelRequested { in_flight: true }
        );
        release_tx.send(()).unwrap();

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            DeploymentOutcome::Cancelled {
                step: WorkflowStep::Download
            }
        );
        let last = reporter.reports().pop().unwrap();
        assert_eq!(last.state, UpdateState::Idle);
        assert_eq!(last.result.code, ResultCode::FailureCancelled);
        assert!(!driver.is_busy());
    }
}
