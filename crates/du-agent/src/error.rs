//! Error types for the agent driver.

use std::path::PathBuf;

use du_agent_core::erc;
use du_agent_handlers::HandlerError;
use du_agent_workflow::WorkflowError;
use thiserror::Error;

use crate::lifecycle::WorkflowStep;

/// A result type using `AgentError`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by the driver and its configuration.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The update action or its manifest could not be turned into a workflow.
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// No top-level handler could be resolved.
    #[error("no update manifest handler for '{update_type}': {source}")]
    NoHandler {
        /// The update type that was tried last.
        update_type: String,
        /// Why the registry failed.
        #[source]
        source: HandlerError,
    },

    /// A collaborator could not be set up.
    #[error("extension error: {0}")]
    Extension(#[from] HandlerError),

    /// A phase was requested while another one is in flight.
    #[error("{requested:?} requested while {running:?} is in progress")]
    PhaseInProgress {
        /// The step that was requested.
        requested: WorkflowStep,
        /// The step still running.
        running: WorkflowStep,
    },

    /// A phase was requested but no deployment is loaded.
    #[error("{0:?} requested with no deployment loaded")]
    NoDeployment(WorkflowStep),

    /// The worker running a phase panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The configuration file could not be read.
    #[error("cannot read config file {path}: {source}")]
    ConfigRead {
        /// The file that was read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid.
    #[error("invalid config: {0}")]
    ConfigParse(String),

    /// A system action (reboot, restart) failed.
    #[error("system action failed: {0}")]
    SystemAction(String),
}

impl AgentError {
    /// The extended result code reported for this error.
    #[must_use]
    pub const fn extended_code(&self) -> i32 {
        match self {
            Self::Workflow(e) => e.extended_code(),
            Self::NoHandler { .. } => erc::platform::NO_UPDATE_MANIFEST_HANDLER,
            Self::Extension(e) => e.extended_code(),
            Self::PhaseInProgress { .. } => erc::platform::PHASE_ALREADY_IN_PROGRESS,
            Self::NoDeployment(_) => erc::platform::ACTION_IN_UNEXPECTED_STATE,
            Self::Worker(_) | Self::ConfigRead { .. } | Self::ConfigParse(_) | Self::SystemAction(_) => {
                erc::platform::WORKER_FAILURE
            }
        }
    }
}
