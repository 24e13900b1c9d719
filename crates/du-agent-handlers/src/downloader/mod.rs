//! Content downloader collaborator.
//!
//! A downloader moves one payload file into a work folder and reports how it
//! went through a progress callback. The registry wraps it with the
//! skip-if-present and hash checks, see [`crate::ExtensionManager::download`].

mod file;
mod http;

use std::path::Path;
use std::time::Duration;

use du_agent_workflow::{CancelToken, FileEntity};

use crate::error::{HandlerError, Result};
use crate::hash;

pub use file::FileCopyDownloader;
pub use http::HttpContentDownloader;

/// Default retry window for a single file.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Terminal state of a file download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProgressState {
    /// The file was written and validated.
    Completed,
    /// The download stopped because cancellation was requested.
    Cancelled,
    /// The download failed.
    Error,
}

/// A progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Workflow the file belongs to.
    pub workflow_id: String,
    /// File id from the manifest.
    pub file_id: String,
    /// Where the download ended up.
    pub state: DownloadProgressState,
    /// Bytes written so far.
    pub current_bytes: u64,
    /// Expected size.
    pub total_bytes: u64,
}

/// Callback receiving download progress.
pub type ProgressFn = dyn Fn(&DownloadProgress) + Send + Sync;

/// Caller-supplied download options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// How long to keep retrying a failing transfer.
    pub retry_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
        }
    }
}

/// Everything a downloader needs besides the file entity.
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    /// Owning workflow, for progress reports.
    pub workflow_id: &'a str,
    /// Destination path.
    pub target: &'a Path,
    /// How long to keep retrying.
    pub retry_timeout: Duration,
    /// Cancellation flag of the owning tree.
    pub cancel: &'a CancelToken,
}

impl DownloadRequest<'_> {
    /// Build a progress notification for `entity`.
    #[must_use]
    pub fn progress(
        &self,
        entity: &FileEntity,
        state: DownloadProgressState,
        current_bytes: u64,
    ) -> DownloadProgress {
        DownloadProgress {
            workflow_id: self.workflow_id.to_string(),
            file_id: entity.file_id.clone(),
            state,
            current_bytes,
            total_bytes: entity.size_in_bytes,
        }
    }

    /// Report `error` as a failed download of `entity` and return it.
    #[must_use]
    pub fn fail(
        &self,
        entity: &FileEntity,
        progress: &ProgressFn,
        current_bytes: u64,
        error: HandlerError,
    ) -> HandlerError {
        let state = if matches!(error, HandlerError::Cancelled) {
            DownloadProgressState::Cancelled
        } else {
            DownloadProgressState::Error
        };
        progress(&self.progress(entity, state, current_bytes));
        error
    }

    /// Validate the written target against `entity`'s hashes and report the
    /// terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the hashes cannot be checked or do not match.
    pub fn finish(&self, entity: &FileEntity, progress: &ProgressFn, bytes: u64) -> Result<u64> {
        match hash::is_valid(self.target, &entity.file_id, &entity.hashes) {
            Ok(true) => {
                progress(&self.progress(entity, DownloadProgressState::Completed, bytes));
                Ok(bytes)
            }
            Ok(false) => Err(self.fail(
                entity,
                progress,
                bytes,
                HandlerError::HashMismatch(entity.file_id.clone()),
            )),
            Err(e) => Err(self.fail(entity, progress, bytes, e)),
        }
    }
}

/// Fetches payload files.
///
/// Implementations report exactly one terminal progress state per call.
pub trait ContentDownloader: Send + Sync {
    /// Apply implementation-specific initialization data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not understood.
    fn initialize(&self, _data: &str) -> Result<()> {
        Ok(())
    }

    /// Download `entity` to `request.target`, validating its hash. Returns
    /// the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails past the retry window, is
    /// cancelled, or the content does not match the entity's hashes.
    fn download(
        &self,
        entity: &FileEntity,
        request: &DownloadRequest<'_>,
        progress: &ProgressFn,
    ) -> Result<u64>;
}

/// A progress callback that only logs.
pub fn log_progress(progress: &DownloadProgress) {
    tracing::debug!(
        workflow_id = %progress.workflow_id,
        file_id = %progress.file_id,
        state = ?progress.state,
        current = progress.current_bytes,
        total = progress.total_bytes,
        "Download progress"
    );
}
