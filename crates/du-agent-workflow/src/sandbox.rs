//! Work folder management.

use std::io::ErrorKind;
use std::path::Path;

use crate::error::{Result, WorkflowError};

/// Check that `name` is a single, relative path component, so joining it onto
/// a work folder stays inside that folder.
///
/// # Errors
///
/// Returns `WorkflowError::UnsafeName` for empty names, `.`, `..`, and names
/// containing a separator or NUL.
pub fn check_name(kind: &'static str, name: &str) -> Result<()> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();
    if unsafe_name {
        return Err(WorkflowError::UnsafeName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Create a fresh work folder, removing any stale content first.
///
/// # Errors
///
/// Returns `WorkflowError::Sandbox` if the folder cannot be removed or created.
pub fn create(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale sandbox"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(source) => {
            return Err(WorkflowError::Sandbox {
                path: path.to_path_buf(),
                source,
            })
        }
    }
    ensure(path)?;
    tracing::info!(path = %path.display(), "Sandbox created");
    Ok(())
}

/// Create a work folder and its parents if missing. Existing content is kept.
///
/// # Errors
///
/// Returns `WorkflowError::Sandbox` if the folder cannot be created.
pub fn ensure(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|source| WorkflowError::Sandbox {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively remove a work folder. A missing folder is not an error.
pub fn destroy(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => tracing::info!(path = %path.display(), "Sandbox destroyed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to destroy sandbox"),
    }
}
