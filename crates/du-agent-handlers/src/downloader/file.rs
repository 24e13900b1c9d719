//! Local `file://` payloads.

use std::path::Path;

use du_agent_workflow::FileEntity;

use super::{ContentDownloader, DownloadRequest, ProgressFn};
use crate::error::{HandlerError, Result};

/// Copies payloads referenced by `file://` URIs. Used for offline updates and
/// the simulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCopyDownloader;

impl FileCopyDownloader {
    /// Create a file-copy downloader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ContentDownloader for FileCopyDownloader {
    fn download(
        &self,
        entity: &FileEntity,
        request: &DownloadRequest<'_>,
        progress: &ProgressFn,
    ) -> Result<u64> {
        let Some(source) = entity
            .download_uri
            .as_deref()
            .and_then(|u| u.strip_prefix("file://"))
        else {
            let uri = entity.download_uri.clone().unwrap_or_default();
            return Err(request.fail(entity, progress, 0, HandlerError::UnsupportedUri(uri)));
        };

        if request.cancel.is_cancelled() {
            return Err(request.fail(entity, progress, 0, HandlerError::Cancelled));
        }

        let copied = match std::fs::copy(Path::new(source), request.target) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(file_id = %entity.file_id, source, error = %e, "Copy failed");
                return Err(request.fail(entity, progress, 0, HandlerError::Transfer(e.to_string())));
            }
        };

        request.finish(entity, progress, copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{DownloadProgress, DownloadProgressState};
    use crate::hash;
    use du_agent_workflow::{CancelToken, FileHash};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entity(source: &Path, content: &[u8]) -> FileEntity {
        FileEntity {
            file_id: "f1".to_string(),
            target_filename: "payload.bin".to_string(),
            download_uri: Some(format!("file://{}", source.display())),
            hashes: vec![FileHash {
                alg: "sha256".to_string(),
                value: hash::sha256_base64_bytes(content),
            }],
            size_in_bytes: content.len() as u64,
            arguments: None,
            download_handler_id: None,
        }
    }

    fn request<'a>(target: &'a Path, cancel: &'a CancelToken) -> DownloadRequest<'a> {
        DownloadRequest {
            workflow_id: "wf",
            target,
            retry_timeout: Duration::from_secs(1),
            cancel,
        }
    }

    /// Download `entity` and return the result with every progress state seen.
    fn run(
        entity: &FileEntity,
        request: &DownloadRequest<'_>,
    ) -> (Result<u64>, Vec<DownloadProgress>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let result = FileCopyDownloader::new().download(entity, request, &move |p| {
            sink.lock().push(p.clone());
        });
        let seen = seen.lock().clone();
        (result, seen)
    }

    fn states(seen: &[DownloadProgress]) -> Vec<DownloadProgressState> {
        seen.iter().map(|p| p.state).collect()
    }

    #[test]
    fn copies_and_reports_completion() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"payload").unwrap();
        let target = dir.path().join("payload.bin");
        let cancel = CancelToken::new();

        let (result, seen) = run(&entity(&source, b"payload"), &request(&target, &cancel));

        assert_eq!(result.unwrap(), 7);
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].state, DownloadProgressState::Completed);
        assert_eq!(seen[0].total_bytes, 7);
    }

    #[test]
    fn cancelled_request_reports_cancelled() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"payload").unwrap();
        let target = dir.path().join("payload.bin");
        let cancel = CancelToken::new();
        cancel.cancel();

        let (result, seen) = run(&entity(&source, b"payload"), &request(&target, &cancel));

        assert!(matches!(result, Err(HandlerError::Cancelled)));
        assert_eq!(states(&seen), [DownloadProgressState::Cancelled]);
        assert!(!target.exists());
    }

    #[test]
    fn mismatched_content_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"tampered").unwrap();
        let target = dir.path().join("payload.bin");
        let cancel = CancelToken::new();

        let (result, seen) = run(&entity(&source, b"payload"), &request(&target, &cancel));

        assert!(matches!(result, Err(HandlerError::HashMismatch(_))));
        assert_eq!(states(&seen), [DownloadProgressState::Error]);
    }

    #[test]
    fn unsupported_uri_reports_an_error() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("payload.bin");
        let cancel = CancelToken::new();
        let mut http = entity(&dir.path().join("source.bin"), b"payload");
        http.download_uri = Some("https://example.com/payload.bin".to_string());

        let (result, seen) = run(&http, &request(&target, &cancel));

        assert!(matches!(result, Err(HandlerError::UnsupportedUri(_))));
        assert_eq!(states(&seen), [DownloadProgressState::Error]);
        assert_eq!(seen[0].current_bytes, 0);
    }

    #[test]
    fn entity_without_hashes_reports_an_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"payload").unwrap();
        let target = dir.path().join("payload.bin");
        let cancel = CancelToken::new();
        let mut unhashed = entity(&source, b"payload");
        unhashed.hashes.clear();

        let (result, seen) = run(&unhashed, &request(&target, &cancel));

        assert!(matches!(result, Err(HandlerError::NoHashes(_))));
        assert_eq!(states(&seen), [DownloadProgressState::Error]);
        assert_eq!(seen[0].current_bytes, 7);
    }
}
