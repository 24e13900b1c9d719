//! Error types for the installed-criteria store.

use du_agent_core::erc;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file could not be read, written or deleted.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file is not a JSON array of records.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// The extended result code reported for this error.
    #[must_use]
    pub const fn extended_code(&self) -> i32 {
        match self {
            Self::Io(_) | Self::Serialization(_) => erc::installed_criteria::STORE_FAILURE,
        }
    }
}
