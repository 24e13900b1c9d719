//! In-memory collaborators for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use du_agent_workflow::FileEntity;
use parking_lot::Mutex;

use crate::downloader::{ContentDownloader, DownloadProgressState, DownloadRequest, ProgressFn};
use crate::enumerator::ComponentEnumerator;
use crate::error::{HandlerError, Result};
use crate::shell::CommandLauncher;

/// A component enumerator returning canned documents.
#[derive(Debug, Default)]
pub struct MockComponentEnumerator {
    selection: Mutex<Option<String>>,
    by_selector: Mutex<HashMap<String, String>>,
    selectors: Mutex<Vec<String>>,
}

impl MockComponentEnumerator {
    /// An enumerator that selects nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `components_json` for every selector.
    pub fn set_selection(&self, components_json: impl Into<String>) {
        *self.selection.lock() = Some(components_json.into());
    }

    /// Return `components_json` for exactly `selector_json`.
    pub fn set_selection_for(
        &self,
        selector_json: impl Into<String>,
        components_json: impl Into<String>,
    ) {
        self.by_selector
            .lock()
            .insert(selector_json.into(), components_json.into());
    }

    /// Selectors received so far.
    #[must_use]
    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().clone()
    }
}

impl ComponentEnumerator for MockComponentEnumerator {
    fn select_components(&self, selector_json: &str) -> Result<String> {
        self.selectors.lock().push(selector_json.to_string());
        if let Some(doc) = self.by_selector.lock().get(selector_json) {
            return Ok(doc.clone());
        }
        Ok(self
            .selection
            .lock()
            .clone()
            .unwrap_or_else(|| r#"{"components":[]}"#.to_string()))
    }

    fn get_all_components(&self) -> Result<String> {
        Ok(self
            .selection
            .lock()
            .clone()
            .unwrap_or_else(|| r#"{"components":[]}"#.to_string()))
    }
}

/// A downloader that writes configured bytes instead of fetching.
#[derive(Debug, Default)]
pub struct MockContentDownloader {
    content: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    downloaded: Mutex<Vec<String>>,
}

impl MockContentDownloader {
    /// A downloader with no content configured. Unknown files are written
    /// empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `content` for `file_id`.
    pub fn set_content(&self, file_id: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.content.lock().insert(file_id.into(), content.into());
    }

    /// Fail every download of `file_id`.
    pub fn fail(&self, file_id: impl Into<String>) {
        self.failing.lock().insert(file_id.into());
    }

    /// File ids downloaded so far, in order.
    #[must_use]
    pub fn downloaded(&self) -> Vec<String> {
        self.downloaded.lock().clone()
    }
}

impl ContentDownloader for MockContentDownloader {
    fn download(
        &self,
        entity: &FileEntity,
        request: &DownloadRequest<'_>,
        progress: &ProgressFn,
    ) -> Result<u64> {
        self.downloaded.lock().push(entity.file_id.clone());

        if request.cancel.is_cancelled() {
            progress(&request.progress(entity, DownloadProgressState::Cancelled, 0));
            return Err(HandlerError::Cancelled);
        }
        if self.failing.lock().contains(&entity.file_id) {
            progress(&request.progress(entity, DownloadProgressState::Error, 0));
            return Err(HandlerError::Transfer(format!("{} unavailable", entity.file_id)));
        }

        let content = self
            .content
            .lock()
            .get(&entity.file_id)
            .cloned()
            .unwrap_or_default();
        std::fs::write(request.target, &content)?;
        let written = content.len() as u64;
        progress(&request.progress(entity, DownloadProgressState::Completed, written));
        Ok(written)
    }
}

/// A launcher that records invocations and returns a scripted exit code.
#[derive(Debug, Default)]
pub struct MockLauncher {
    exit_code: Mutex<Option<i32>>,
    invocations: Mutex<Vec<Vec<String>>>,
    launches: AtomicUsize,
}

impl MockLauncher {
    /// A launcher whose commands exit with 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            exit_code: Mutex::new(Some(0)),
            ..Self::default()
        }
    }

    /// Make subsequent commands exit with `code`, or die by signal if `None`.
    pub fn set_exit_code(&self, code: Option<i32>) {
        *self.exit_code.lock() = code;
    }

    /// Arguments of every invocation so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.invocations.lock().clone()
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl CommandLauncher for MockLauncher {
    fn launch(&self, args: &[String]) -> std::io::Result<Option<i32>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.invocations.lock().push(args.to_vec());
        Ok(*self.exit_code.lock())
    }
}
