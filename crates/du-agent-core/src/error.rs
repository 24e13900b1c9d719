//! Common error types for the device update agent.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while converting the core vocabulary from raw values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A numeric result code that is not part of the result vocabulary.
    #[error("unknown result code: {0}")]
    UnknownResultCode(i32),

    /// A numeric update state that is not part of the state vocabulary.
    #[error("unknown update state: {0}")]
    UnknownState(i32),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),
}
