//! Installed-criteria persistence for the device update agent.
//!
//! Handlers that have no better way to tell whether their update is on the
//! device record an opaque *installed criteria* string after a successful
//! install, and look it up before doing any work.
//!
//! # Example
//!
//! ```no_run
//! use du_agent_store::{InstalledCriteriaStore, JsonFileStore};
//!
//! let store = JsonFileStore::new("/var/lib/du/installedcriteria");
//! store.persist("contoso-firmware-1.2").unwrap();
//! assert!(store.is_installed("contoso-firmware-1.2"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod json_file;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{Result, StoreError};
pub use json_file::JsonFileStore;
pub use types::{CriteriaRecord, CriteriaState};

use du_agent_core::{AducResult, ResultCode};

/// Storage of installed-criteria records.
pub trait InstalledCriteriaStore: Send + Sync {
    /// Append a record marking `criteria` as installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    fn persist(&self, criteria: &str) -> Result<()>;

    /// Remove every record matching `criteria`. Returns how many were removed;
    /// a missing store or record removes nothing and is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    fn remove(&self, criteria: &str) -> Result<usize>;

    /// Remove every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be deleted.
    fn remove_all(&self) -> Result<()>;

    /// Returns true if a record for `criteria` exists. Unreadable stores
    /// count as empty.
    fn is_installed(&self, criteria: &str) -> bool;

    /// Map [`InstalledCriteriaStore::is_installed`] onto the result vocabulary.
    fn get_is_installed(&self, criteria: &str) -> AducResult {
        if self.is_installed(criteria) {
            AducResult::from_code(ResultCode::IsInstalledInstalled)
        } else {
            AducResult::from_code(ResultCode::IsInstalledNotInstalled)
        }
    }
}
