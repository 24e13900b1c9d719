//! Error types for the handler layer.

use du_agent_core::erc;
use du_agent_store::StoreError;
use du_agent_workflow::WorkflowError;
use thiserror::Error;

/// A result type using `HandlerError`.
pub type Result<T> = std::result::Result<T, HandlerError>;

/// Errors raised by the registry and its collaborators.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the update type.
    #[error("no handler registered for update type '{0}'")]
    NotFound(String),

    /// The handler is registered but could not be instantiated.
    #[error("failed to load handler for '{update_type}': {reason}")]
    LoadFailure {
        /// The requested update type.
        update_type: String,
        /// Why instantiation failed.
        reason: String,
    },

    /// A component operation was requested but no enumerator is registered.
    #[error("component enumerator is not registered")]
    EnumeratorNotRegistered,

    /// The component enumerator rejected the selector or failed.
    #[error("select components failed: {0}")]
    SelectComponents(String),

    /// The enumerator returned something other than a components document.
    #[error("invalid components data: {0}")]
    InvalidComponents(String),

    /// A download was requested but no content downloader is registered.
    #[error("content downloader is not initialized")]
    DownloaderNotInitialized,

    /// The file entity has no download URI or the scheme is not handled.
    #[error("unsupported download uri: {0}")]
    UnsupportedUri(String),

    /// The transfer failed and retries were exhausted.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The HTTP client reported an error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The download was cancelled.
    #[error("download cancelled")]
    Cancelled,

    /// The file entity carries no hash.
    #[error("file entity '{0}' has no hashes")]
    NoHashes(String),

    /// None of the file entity's hash algorithms is supported.
    #[error("unsupported hash algorithm '{0}'")]
    UnsupportedHashType(String),

    /// The downloaded content does not match any of the expected hashes.
    #[error("hash mismatch for '{0}'")]
    HashMismatch(String),

    /// A stale file with a bad hash could not be removed.
    #[error("cannot delete existing file {path}: {source}")]
    DeleteExisting {
        /// The file that could not be deleted.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Local file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Workflow data was invalid.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The installed-criteria store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// The extended result code reported for this error.
    #[must_use]
    pub const fn extended_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => erc::extension::HANDLER_NOT_FOUND,
            Self::LoadFailure { .. } => erc::extension::HANDLER_LOAD_FAILURE,
            Self::EnumeratorNotRegistered => erc::extension::COMPONENT_ENUMERATOR_NOT_REGISTERED,
            Self::SelectComponents(_) => erc::extension::SELECT_COMPONENTS_FAILURE,
            Self::InvalidComponents(_) => erc::extension::INVALID_COMPONENTS_DATA,
            Self::DownloaderNotInitialized => erc::downloader::NOT_INITIALIZED,
            Self::UnsupportedUri(_) => erc::downloader::UNSUPPORTED_URI,
            Self::Transfer(_) | Self::Http(_) => erc::downloader::TRANSFER_FAILURE,
            Self::Cancelled => erc::downloader::CANCELLED,
            Self::NoHashes(_) => erc::downloader::INVALID_FILE_ENTITY_NO_HASHES,
            Self::UnsupportedHashType(_) => erc::downloader::FILE_HASH_TYPE_NOT_SUPPORTED,
            Self::HashMismatch(_) => erc::downloader::INVALID_FILE_HASH,
            Self::DeleteExisting { .. } => erc::downloader::CANNOT_DELETE_EXISTING_FILE,
            Self::Io(_) => erc::downloader::DOWNLOAD_EXCEPTION,
            Self::Workflow(e) => e.extended_code(),
            Self::Store(e) => e.extended_code(),
        }
    }
}
