//! Extended result codes.
//!
//! An extended result code is a 32-bit value: the top 4 bits name the
//! facility, the next 8 bits name the reporting component and the low 20 bits
//! carry the component-specific value.
//!
//! ```text
//!  31    28 27        20 19                     0
//! ┌────────┬────────────┬────────────────────────┐
//! │facility│ component  │         value          │
//! └────────┴────────────┴────────────────────────┘
//! ```

/// The subsystem family an extended result code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Facility {
    /// Errors raised by the agent's orchestration layers.
    UpperLevel = 0x8,
    /// Raw `errno` values.
    Errno = 0xE,
    /// Errors from the platform layer.
    LowerLayer = 0xF,
}

/// The component that produced an upper-level extended result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Component {
    /// Workflow tree construction and manifest parsing.
    WorkflowUtil = 0x01,
    /// Handler registry.
    ExtensionManager = 0x02,
    /// Content downloader calls made through the registry.
    ContentDownloader = 0x03,
    /// Steps composite handler.
    StepsHandler = 0x04,
    /// Components composite handler.
    ComponentsHandler = 0x05,
    /// Bundle composite handler.
    BundleHandler = 0x06,
    /// Leaf handlers that cross the privilege boundary.
    ShellHandler = 0x07,
    /// Installed-criteria persistence.
    InstalledCriteria = 0x08,
    /// Top-level workflow driver.
    Platform = 0x09,
}

/// Build an extended result code from its parts.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn make_erc(facility: Facility, component: u8, value: u32) -> i32 {
    let raw = ((facility as u32 & 0xF) << 28) | ((component as u32) << 20) | (value & 0xF_FFFF);
    raw as i32
}

/// Build an upper-level extended result code for `component`.
#[must_use]
pub const fn upper(component: Component, value: u32) -> i32 {
    make_erc(Facility::UpperLevel, component as u8, value)
}

/// Wrap an `errno` value.
#[must_use]
pub const fn errno(value: i32) -> i32 {
    make_erc(Facility::Errno, 0, value.unsigned_abs())
}

/// Fold the exit status of a privileged child process into an extended code.
#[must_use]
pub const fn child_process_exit(status: i32) -> i32 {
    upper(Component::ShellHandler, 0x1_0000 | (status.unsigned_abs() & 0xFFFF))
}

/// Extract the facility nibble of an extended code.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn facility_of(erc: i32) -> u8 {
    (((erc as u32) >> 28) & 0xF) as u8
}

/// Extract the component byte of an extended code.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn component_of(erc: i32) -> u8 {
    (((erc as u32) >> 20) & 0xFF) as u8
}

/// Extract the value bits of an extended code.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn value_of(erc: i32) -> u32 {
    (erc as u32) & 0xF_FFFF
}

/// Named workflow-utility codes.
pub mod workflow {
    use super::{upper, Component};

    /// The update action is not valid JSON.
    pub const INVALID_ACTION_JSON: i32 = upper(Component::WorkflowUtil, 1);
    /// The update action has no update manifest.
    pub const NO_UPDATE_MANIFEST: i32 = upper(Component::WorkflowUtil, 2);
    /// The update manifest is not valid JSON or misses required fields.
    pub const INVALID_UPDATE_MANIFEST: i32 = upper(Component::WorkflowUtil, 3);
    /// The manifest version is below the supported minimum.
    pub const UNSUPPORTED_UPDATE_MANIFEST_VERSION: i32 = upper(Component::WorkflowUtil, 4);
    /// A manifest file could not be read.
    pub const INVALID_ACTION_JSON_FILE: i32 = upper(Component::WorkflowUtil, 5);
    /// An install-item instruction could not be parsed.
    pub const PARSE_INSTRUCTION_ENTRY_FAILURE: i32 = upper(Component::WorkflowUtil, 6);
    /// An install-item instruction names no update type.
    pub const INSTRUCTION_ENTRY_NO_UPDATE_TYPE: i32 = upper(Component::WorkflowUtil, 7);
    /// A step index is out of range.
    pub const INVALID_STEP_INDEX: i32 = upper(Component::WorkflowUtil, 8);
    /// A file id is not declared in the manifest.
    pub const FILE_NOT_FOUND: i32 = upper(Component::WorkflowUtil, 9);
    /// The sandbox folder could not be created.
    pub const SANDBOX_CREATE_FAILURE: i32 = upper(Component::WorkflowUtil, 10);
    /// The workflow has no id.
    pub const MISSING_WORKFLOW_ID: i32 = upper(Component::WorkflowUtil, 11);
    /// A workflow id or file name is not a single path component.
    pub const UNSAFE_PATH_NAME: i32 = upper(Component::WorkflowUtil, 12);
}

/// Named registry codes.
pub mod extension {
    use super::{upper, Component};

    /// No handler is registered for the update type.
    pub const HANDLER_NOT_FOUND: i32 = upper(Component::ExtensionManager, 1);
    /// The handler factory failed to produce an instance.
    pub const HANDLER_LOAD_FAILURE: i32 = upper(Component::ExtensionManager, 2);
    /// No component enumerator is registered.
    pub const COMPONENT_ENUMERATOR_NOT_REGISTERED: i32 = upper(Component::ExtensionManager, 3);
    /// The component enumerator failed to select components.
    pub const SELECT_COMPONENTS_FAILURE: i32 = upper(Component::ExtensionManager, 4);
    /// The component enumerator returned malformed data.
    pub const INVALID_COMPONENTS_DATA: i32 = upper(Component::ExtensionManager, 5);
    /// The collaborator contract version is not supported.
    pub const UNSUPPORTED_CONTRACT_VERSION: i32 = upper(Component::ExtensionManager, 6);
}

/// Named content-downloader codes.
pub mod downloader {
    use super::{upper, Component};

    /// No content downloader is configured.
    pub const NOT_INITIALIZED: i32 = upper(Component::ContentDownloader, 1);
    /// The target path for a file entity could not be built.
    pub const BAD_TARGET_FILE_PATH: i32 = upper(Component::ContentDownloader, 2);
    /// The file entity declares an unsupported hash type.
    pub const FILE_HASH_TYPE_NOT_SUPPORTED: i32 = upper(Component::ContentDownloader, 3);
    /// The file entity carries no hashes.
    pub const INVALID_FILE_ENTITY_NO_HASHES: i32 = upper(Component::ContentDownloader, 4);
    /// An existing file with an invalid hash could not be deleted.
    pub const CANNOT_DELETE_EXISTING_FILE: i32 = upper(Component::ContentDownloader, 5);
    /// The downloaded file does not match its hash.
    pub const INVALID_FILE_HASH: i32 = upper(Component::ContentDownloader, 6);
    /// The download collaborator panicked or failed unexpectedly.
    pub const DOWNLOAD_EXCEPTION: i32 = upper(Component::ContentDownloader, 7);
    /// The transfer failed and the retry window elapsed.
    pub const TRANSFER_FAILURE: i32 = upper(Component::ContentDownloader, 8);
    /// The download URI scheme is not supported.
    pub const UNSUPPORTED_URI: i32 = upper(Component::ContentDownloader, 9);
    /// The download was cancelled.
    pub const CANCELLED: i32 = upper(Component::ContentDownloader, 10);
}

/// Named Steps handler codes.
pub mod steps {
    use super::{upper, Component};

    /// Creating a child workflow for a step failed.
    pub const CREATE_CHILD_WORKFLOW_FAILED: i32 = upper(Component::StepsHandler, 1);
    /// The detached manifest of a reference step could not be downloaded.
    pub const DOWNLOAD_FAILURE_UNKNOWNEXCEPTION: i32 = upper(Component::StepsHandler, 2);
    /// A reference step has no compatibility information.
    pub const GET_REF_STEP_COMPATIBILITY_FAILED: i32 = upper(Component::StepsHandler, 3);
    /// The components enumerator failed to select components for a step.
    pub const SELECT_COMPONENTS_FAILED: i32 = upper(Component::StepsHandler, 4);
    /// The selected components are missing or malformed.
    pub const INVALID_COMPONENTS_DATA: i32 = upper(Component::StepsHandler, 5);
    /// The child workflow of a step is missing.
    pub const INVALID_CHILD_WORKFLOW: i32 = upper(Component::StepsHandler, 6);
    /// A child handler panicked during `IsInstalled`.
    pub const ISINSTALLED_UNKNOWN_EXCEPTION: i32 = upper(Component::StepsHandler, 7);
    /// A child handler panicked during `Download`.
    pub const CHILD_DOWNLOAD_UNKNOWN_EXCEPTION: i32 = upper(Component::StepsHandler, 8);
    /// A child handler panicked during `Backup`.
    pub const CHILD_BACKUP_UNKNOWN_EXCEPTION: i32 = upper(Component::StepsHandler, 9);
    /// A child handler panicked during `Install`.
    pub const CHILD_INSTALL_UNKNOWN_EXCEPTION: i32 = upper(Component::StepsHandler, 10);
    /// A child handler panicked during `Apply`.
    pub const CHILD_APPLY_UNKNOWN_EXCEPTION: i32 = upper(Component::StepsHandler, 11);
    /// The sandbox folder could not be created.
    pub const CREATE_SANDBOX_FAILURE: i32 = upper(Component::StepsHandler, 12);
}

/// Named Components handler codes.
pub mod components {
    use super::{upper, Component};

    /// The selected components are missing or malformed.
    pub const INVALID_COMPONENTS_DATA: i32 = upper(Component::ComponentsHandler, 1);
    /// A payload file entity could not be resolved.
    pub const GET_FILE_ENTITY_FAILURE: i32 = upper(Component::ComponentsHandler, 2);
    /// A payload download panicked.
    pub const DOWNLOAD_FAILURE_UNKNOWN_EXCEPTION: i32 = upper(Component::ComponentsHandler, 3);
    /// No payload file ends with `instructions.json`.
    pub const NO_INSTRUCTION_FILE: i32 = upper(Component::ComponentsHandler, 4);
    /// The instructions file could not be parsed.
    pub const INSTRUCTION_PARSE_FAILURE: i32 = upper(Component::ComponentsHandler, 5);
    /// An install item could not be turned into a workflow.
    pub const INSTALLITEM_BAD_DATA: i32 = upper(Component::ComponentsHandler, 6);
    /// An install item names no update type.
    pub const NO_UPDATE_TYPE: i32 = upper(Component::ComponentsHandler, 7);
    /// An install item's handler panicked during `IsInstalled`.
    pub const ISINSTALLED_UNKNOWN_EXCEPTION: i32 = upper(Component::ComponentsHandler, 8);
    /// An install item's handler panicked during `Install`.
    pub const INSTALL_UNKNOWN_EXCEPTION: i32 = upper(Component::ComponentsHandler, 9);
    /// An install item's handler panicked during `Apply`.
    pub const APPLY_UNKNOWN_EXCEPTION: i32 = upper(Component::ComponentsHandler, 10);
    /// Installed criteria could not be persisted.
    pub const INSTALLCRITERIA_PERSIST_FAILURE: i32 = upper(Component::ComponentsHandler, 11);
    /// The update has no installed criteria.
    pub const MISSING_INSTALLED_CRITERIA: i32 = upper(Component::ComponentsHandler, 12);
    /// The work folder could not be created.
    pub const CREATE_SANDBOX_FAILURE: i32 = upper(Component::ComponentsHandler, 13);
}

/// Named Bundle handler codes.
pub mod bundle {
    use super::{upper, Component};

    /// A bundle member manifest could not be downloaded.
    pub const DOWNLOAD_FAILURE_UNKNOWN_EXCEPTION: i32 = upper(Component::BundleHandler, 1);
    /// A bundle member manifest could not be parsed.
    pub const CREATE_CHILD_WORKFLOW_FAILED: i32 = upper(Component::BundleHandler, 2);
    /// A bundle member has no compatibility information.
    pub const GET_LEAF_COMPAT_FAILURE: i32 = upper(Component::BundleHandler, 3);
    /// The components enumerator failed for a bundle member.
    pub const SELECT_COMPONENTS_FAILED: i32 = upper(Component::BundleHandler, 4);
    /// Installed criteria could not be persisted.
    pub const INSTALLCRITERIA_PERSIST_FAILURE: i32 = upper(Component::BundleHandler, 5);
    /// The update has no installed criteria.
    pub const MISSING_INSTALLED_CRITERIA: i32 = upper(Component::BundleHandler, 6);
    /// A bundle member handler panicked.
    pub const CHILD_UNKNOWN_EXCEPTION: i32 = upper(Component::BundleHandler, 7);
}

/// Named shell-launching leaf handler codes.
pub mod shell {
    use super::{upper, Component};

    /// The update has no payload file to act on.
    pub const MISSING_PRIMARY_FILE: i32 = upper(Component::ShellHandler, 1);
    /// The launcher process could not be spawned.
    pub const LAUNCH_FAILURE: i32 = upper(Component::ShellHandler, 2);
    /// The launcher was terminated by a signal.
    pub const TERMINATED_BY_SIGNAL: i32 = upper(Component::ShellHandler, 3);
    /// Installed criteria could not be persisted.
    pub const INSTALLCRITERIA_PERSIST_FAILURE: i32 = upper(Component::ShellHandler, 4);
    /// The update has no installed criteria.
    pub const MISSING_INSTALLED_CRITERIA: i32 = upper(Component::ShellHandler, 5);
    /// More than one component was selected for a single-target handler.
    pub const TOO_MANY_COMPONENTS: i32 = upper(Component::ShellHandler, 6);
}

/// Named installed-criteria codes.
pub mod installed_criteria {
    use super::{upper, Component};

    /// The persistence file could not be read or written.
    pub const STORE_FAILURE: i32 = upper(Component::InstalledCriteria, 1);
}

/// Named driver codes.
pub mod platform {
    use super::{upper, Component};

    /// No top-level handler matches the manifest version.
    pub const NO_UPDATE_MANIFEST_HANDLER: i32 = upper(Component::Platform, 1);
    /// A phase was requested while another phase was in flight.
    pub const PHASE_ALREADY_IN_PROGRESS: i32 = upper(Component::Platform, 2);
    /// A phase was requested in a state that does not allow it.
    pub const ACTION_IN_UNEXPECTED_STATE: i32 = upper(Component::Platform, 3);
    /// The worker running a phase panicked or was aborted.
    pub const WORKER_FAILURE: i32 = upper(Component::Platform, 4);
    /// A top-level handler panicked.
    pub const HANDLER_UNKNOWN_EXCEPTION: i32 = upper(Component::Platform, 5);
    /// The update type of the top-level workflow is empty.
    pub const ISINSTALLED_BAD_UPDATETYPE: i32 = upper(Component::Platform, 6);
}
