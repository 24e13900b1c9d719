//! Error types for workflow construction.

use std::path::PathBuf;

use du_agent_core::erc;
use thiserror::Error;

/// A result type using `WorkflowError`.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur while building or navigating a workflow tree.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The update action document is not valid JSON or misses required fields.
    #[error("invalid update action: {0}")]
    InvalidAction(String),

    /// The update action file could not be read.
    #[error("cannot read update action file {path}: {source}")]
    ActionFile {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A process-deployment action carries no update manifest.
    #[error("update action has no update manifest")]
    NoUpdateManifest,

    /// The update manifest could not be parsed.
    #[error("invalid update manifest: {0}")]
    InvalidManifest(String),

    /// The manifest version is below the supported minimum.
    #[error("unsupported update manifest version: {0}")]
    UnsupportedManifestVersion(String),

    /// An install item could not be parsed.
    #[error("invalid install item: {0}")]
    InvalidInstruction(String),

    /// An install item has no update type.
    #[error("install item has no update type")]
    InstructionNoUpdateType,

    /// A step index is out of range or the step has the wrong kind.
    #[error("invalid step index: {0}")]
    InvalidStepIndex(usize),

    /// A file id referenced by the manifest is not declared in `files`.
    #[error("file not found in manifest: {0}")]
    FileNotFound(String),

    /// The work folder could not be created or removed.
    #[error("sandbox error at {path}: {source}")]
    Sandbox {
        /// Work folder path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The update action has an empty workflow id.
    #[error("workflow id is missing")]
    MissingWorkflowId,

    /// A workflow id or file name would leave the work folder.
    #[error("{kind} {name:?} is not a plain file name")]
    UnsafeName {
        /// What the name is used for.
        kind: &'static str,
        /// The rejected value.
        name: String,
    },

    /// Selected components are not a `{"components": [...]}` document.
    #[error("invalid components data: {0}")]
    InvalidComponents(String),
}

impl WorkflowError {
    /// The extended result code reported for this error.
    #[must_use]
    pub const fn extended_code(&self) -> i32 {
        match self {
            Self::InvalidAction(_) => erc::workflow::INVALID_ACTION_JSON,
            Self::ActionFile { .. } => erc::workflow::INVALID_ACTION_JSON_FILE,
            Self::NoUpdateManifest => erc::workflow::NO_UPDATE_MANIFEST,
            Self::InvalidManifest(_) => erc::workflow::INVALID_UPDATE_MANIFEST,
            Self::UnsupportedManifestVersion(_) => {
                erc::workflow::UNSUPPORTED_UPDATE_MANIFEST_VERSION
            }
            Self::InvalidInstruction(_) => erc::workflow::PARSE_INSTRUCTION_ENTRY_FAILURE,
            Self::InstructionNoUpdateType => erc::workflow::INSTRUCTION_ENTRY_NO_UPDATE_TYPE,
            Self::InvalidStepIndex(_) => erc::workflow::INVALID_STEP_INDEX,
            Self::FileNotFound(_) => erc::workflow::FILE_NOT_FOUND,
            Self::Sandbox { .. } => erc::workflow::SANDBOX_CREATE_FAILURE,
            Self::MissingWorkflowId => erc::workflow::MISSING_WORKFLOW_ID,
            Self::UnsafeName { .. } => erc::workflow::UNSAFE_PATH_NAME,
            Self::InvalidComponents(_) => erc::extension::INVALID_COMPONENTS_DATA,
        }
    }
}
