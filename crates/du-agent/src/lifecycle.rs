//! The deployment workflow-step table.
//!
//! Every step names the state reported when it completes and the step the
//! driver moves to next.
//!
//! ```text
//!   ProcessDeployment ──▶ Download ──▶ Backup ──▶ Install ──▶ Apply ──▶ (Idle)
//!          │                 │           │          │           │
//!          ▼                 ▼           ▼          ▼           ▼
//!       (Failed)          (Failed)    (Failed)   Restore ◀──────┘
//!                                                   │
//!                                                   ▼
//!                                             (Idle / Failed)
//! ```

use du_agent_core::{ResultCode, UpdateState};

/// One step of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowStep {
    /// Acknowledge the deployment and prepare its work folder.
    ProcessDeployment,
    /// Fetch every payload.
    Download,
    /// Snapshot what a restore would roll back to.
    Backup,
    /// Perform the update.
    Install,
    /// Finalize the update.
    Apply,
    /// Roll back after a failed install or apply.
    Restore,
}

impl WorkflowStep {
    /// State reported while the step runs, if any.
    #[must_use]
    pub const fn started_state(self) -> Option<UpdateState> {
        match self {
            Self::ProcessDeployment => None,
            Self::Download => Some(UpdateState::DownloadStarted),
            Self::Backup => Some(UpdateState::BackupStarted),
            Self::Install => Some(UpdateState::InstallStarted),
            Self::Apply => Some(UpdateState::ApplyStarted),
            Self::Restore => Some(UpdateState::RestoreStarted),
        }
    }

    /// Result reported alongside [`WorkflowStep::started_state`].
    #[must_use]
    pub const fn in_progress_code(self) -> ResultCode {
        match self {
            Self::ProcessDeployment => ResultCode::DeploymentInProgressSuccess,
            Self::Download => ResultCode::DownloadInProgress,
            Self::Backup => ResultCode::BackupInProgress,
            Self::Install => ResultCode::InstallInProgress,
            Self::Apply => ResultCode::ApplyInProgress,
            Self::Restore => ResultCode::RestoreInProgress,
        }
    }

    /// Returns true for the steps after which reboot and restart requests
    /// are acted on.
    #[must_use]
    pub const fn honors_interrupts(self) -> bool {
        matches!(self, Self::Install | Self::Apply | Self::Restore)
    }
}

/// Where a step leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEntry {
    /// The step this entry describes.
    pub step: WorkflowStep,
    /// State reported on success.
    pub success_state: UpdateState,
    /// Step started automatically on success. `None` ends the workflow.
    pub next_on_success: Option<WorkflowStep>,
    /// State reported on failure.
    pub failure_state: UpdateState,
    /// Step started automatically on failure. `None` ends the workflow.
    pub next_on_failure: Option<WorkflowStep>,
}

impl StepEntry {
    /// The state to report for a completed step.
    #[must_use]
    pub const fn state_for(&self, succeeded: bool) -> UpdateState {
        if succeeded {
            self.success_state
        } else {
            self.failure_state
        }
    }

    /// The step to run after a completed step.
    #[must_use]
    pub const fn next_for(&self, succeeded: bool) -> Option<WorkflowStep> {
        if succeeded {
            self.next_on_success
        } else {
            self.next_on_failure
        }
    }
}

/// The workflow-step table.
pub const STEP_TABLE: [StepEntry; 6] = [
    StepEntry {
        step: WorkflowStep::ProcessDeployment,
        success_state: UpdateState::DeploymentInProgress,
        next_on_success: Some(WorkflowStep::Download),
        failure_state: UpdateState::Failed,
        next_on_failure: None,
    },
    StepEntry {
        step: WorkflowStep::Download,
        success_state: UpdateState::DownloadSucceeded,
        next_on_success: Some(WorkflowStep::Backup),
        failure_state: UpdateState::Failed,
        next_on_failure: None,
    },
    // A failed backup ends the deployment. Handlers that can live without a
    // backup report success instead.
    StepEntry {
        step: WorkflowStep::Backup,
        success_state: UpdateState::BackupSucceeded,
        next_on_success: Some(WorkflowStep::Install),
        failure_state: UpdateState::Failed,
        next_on_failure: None,
    },
    StepEntry {
        step: WorkflowStep::Install,
        success_state: UpdateState::InstallSucceeded,
        next_on_success: Some(WorkflowStep::Apply),
        failure_state: UpdateState::Failed,
        next_on_failure: Some(WorkflowStep::Restore),
    },
    // There is no "apply succeeded" state.
    StepEntry {
        step: WorkflowStep::Apply,
        success_state: UpdateState::Idle,
        next_on_success: None,
        failure_state: UpdateState::Failed,
        next_on_failure: Some(WorkflowStep::Restore),
    },
    StepEntry {
        step: WorkflowStep::Restore,
        success_state: UpdateState::Idle,
        next_on_success: None,
        failure_state: UpdateState::Failed,
        next_on_failure: None,
    },
];

/// Look up the entry of `step`.
#[must_use]
pub fn entry(step: WorkflowStep) -> &'static StepEntry {
    STEP_TABLE
        .iter()
        .find(|e| e.step == step)
        .unwrap_or(&STEP_TABLE[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_step_has_its_own_entry() {
        for step in [
            WorkflowStep::ProcessDeployment,
            WorkflowStep::Download,
            WorkflowStep::Backup,
            WorkflowStep::Install,
            WorkflowStep::Apply,
            WorkflowStep::Restore,
        ] {
            assert_eq!(entry(step).step, step);
        }
    }

    #[test]
    fn success_path_ends_idle_after_apply() {
        let mut step = WorkflowStep::ProcessDeployment;
        let mut path = vec![step];
        while let Some(next) = entry(step).next_for(true) {
            path.push(next);
            step = next;
        }
        assert_eq!(
            path,
            [
                WorkflowStep::ProcessDeployment,
                WorkflowStep::Download,
                WorkflowStep::Backup,
                WorkflowStep::Install,
                WorkflowStep::Apply,
            ]
        );
        assert_eq!(entry(step).state_for(true), UpdateState::Idle);
    }

    #[test]
    fn install_and_apply_failures_restore() {
        assert_eq!(
            entry(WorkflowStep::Install).next_for(false),
            Some(WorkflowStep::Restore)
        );
        assert_eq!(
            entry(WorkflowStep::Apply).next_for(false),
            Some(WorkflowStep::Restore)
        );
        assert_eq!(entry(WorkflowStep::Download).next_for(false), None);
        assert_eq!(entry(WorkflowStep::Restore).next_for(false), None);
        assert_eq!(
            entry(WorkflowStep::Restore).state_for(false),
            UpdateState::Failed
        );
    }

    #[test]
    fn interrupts_follow_device_changing_steps() {
        assert!(WorkflowStep::Install.honors_interrupts());
        assert!(WorkflowStep::Restore.honors_interrupts());
        assert!(!WorkflowStep::Download.honors_interrupts());
    }
}
