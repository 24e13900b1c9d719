//! The extension registry.
//!
//! Maps update-type strings to handler instances, and owns the optional
//! collaborators (component enumerator, content downloader). Handlers are
//! registered as factories and instantiated on first use; every later lookup
//! of the same type returns the cached instance.

use std::collections::HashMap;
use std::sync::Arc;

use du_agent_core::{AducResult, ResultCode};
use du_agent_workflow::{sandbox, FileEntity, Workflow};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::downloader::{ContentDownloader, DownloadOptions, DownloadRequest, ProgressFn};
use crate::enumerator::ComponentEnumerator;
use crate::error::{HandlerError, Result};
use crate::handler::ContentHandler;
use crate::hash;

type HandlerFactory = Box<dyn Fn() -> Result<Arc<dyn ContentHandler>> + Send + Sync>;

/// Resolves update types to handlers and brokers collaborator calls.
#[derive(Default)]
pub struct ExtensionManager {
    factories: RwLock<HashMap<String, HandlerFactory>>,
    handlers: Mutex<HashMap<String, Arc<dyn ContentHandler>>>,
    enumerator: RwLock<Option<Arc<dyn ComponentEnumerator>>>,
    downloader: RwLock<Option<Arc<dyn ContentDownloader>>>,
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<String> = self.factories.read().keys().cloned().collect();
        registered.sort();
        let loaded = self.handlers.lock().len();
        f.debug_struct("ExtensionManager")
            .field("registered", &registered)
            .field("loaded", &loaded)
            .field("enumerator", &self.is_components_enumerator_registered())
            .field("downloader", &self.downloader.read().is_some())
            .finish()
    }
}

impl ExtensionManager {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Register a factory for `update_type`. Replaces an earlier registration
    /// but not an already loaded instance.
    ///
    /// The factory runs under the registry lock and must not call back into
    /// [`ExtensionManager::load_handler`].
    pub fn register_handler<F>(&self, update_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ContentHandler>> + Send + Sync + 'static,
    {
        let update_type = update_type.into();
        tracing::debug!(update_type = %update_type, "Registered handler factory");
        self.factories.write().insert(update_type, Box::new(factory));
    }

    /// Returns true if a factory or instance exists for `update_type`.
    #[must_use]
    pub fn is_registered(&self, update_type: &str) -> bool {
        if self.handlers.lock().contains_key(update_type) {
            return true;
        }
        self.factories.read().contains_key(update_type)
    }

    /// Returns true if `update_type` has been instantiated.
    #[must_use]
    pub fn is_loaded(&self, update_type: &str) -> bool {
        self.handlers.lock().contains_key(update_type)
    }

    /// Resolve the handler for `update_type`, instantiating it on first use.
    ///
    /// Concurrent callers for the same type observe a single instantiation.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::NotFound` if nothing is registered for the type,
    /// or `HandlerError::LoadFailure` if its factory fails.
    pub fn load_handler(&self, update_type: &str) -> Result<Arc<dyn ContentHandler>> {
        let mut handlers = self.handlers.lock();
        if let Some(handler) = handlers.get(update_type) {
            return Ok(Arc::clone(handler));
        }

        let factories = self.factories.read();
        let factory = factories.get(update_type).ok_or_else(|| {
            tracing::error!(update_type, "No handler registered");
            HandlerError::NotFound(update_type.to_string())
        })?;

        let handler = factory().map_err(|e| {
            tracing::error!(update_type, error = %e, "Handler factory failed");
            HandlerError::LoadFailure {
                update_type: update_type.to_string(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!(update_type, "Loaded handler");
        handlers.insert(update_type.to_string(), Arc::clone(&handler));
        Ok(handler)
    }

    /// Install `handler` as the loaded instance for `update_type`.
    pub fn set_handler(&self, update_type: impl Into<String>, handler: Arc<dyn ContentHandler>) {
        self.handlers.lock().insert(update_type.into(), handler);
    }

    /// Drop every loaded handler. Factories stay registered, so the next
    /// lookup instantiates afresh. Safe to call repeatedly.
    pub fn unload_all(&self) {
        let mut handlers = self.handlers.lock();
        if !handlers.is_empty() {
            tracing::info!(count = handlers.len(), "Unloading handlers");
        }
        handlers.clear();
    }

    // =========================================================================
    // Component enumerator
    // =========================================================================

    /// Register the component enumerator.
    pub fn set_component_enumerator(&self, enumerator: Arc<dyn ComponentEnumerator>) {
        *self.enumerator.write() = Some(enumerator);
    }

    /// Returns true if a component enumerator is registered.
    #[must_use]
    pub fn is_components_enumerator_registered(&self) -> bool {
        self.enumerator.read().is_some()
    }

    fn enumerator(&self) -> Result<Arc<dyn ComponentEnumerator>> {
        self.enumerator
            .read()
            .clone()
            .ok_or(HandlerError::EnumeratorNotRegistered)
    }

    /// Select the components matching `selector_json`. The returned document
    /// always has a `components` array.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::EnumeratorNotRegistered` without an enumerator,
    /// `HandlerError::SelectComponents` if it fails, or
    /// `HandlerError::InvalidComponents` if its answer is malformed.
    pub fn select_components(&self, selector_json: &str) -> Result<Value> {
        let raw = self
            .enumerator()?
            .select_components(selector_json)
            .map_err(|e| {
                if matches!(e, HandlerError::SelectComponents(_)) {
                    e
                } else {
                    HandlerError::SelectComponents(e.to_string())
                }
            })?;
        parse_components(&raw)
    }

    /// Every component the enumerator knows.
    ///
    /// # Errors
    ///
    /// As for [`ExtensionManager::select_components`].
    pub fn get_all_components(&self) -> Result<Value> {
        let raw = self.enumerator()?.get_all_components()?;
        parse_components(&raw)
    }

    // =========================================================================
    // Content downloader
    // =========================================================================

    /// Register the content downloader.
    pub fn set_content_downloader(&self, downloader: Arc<dyn ContentDownloader>) {
        *self.downloader.write() = Some(downloader);
    }

    /// Pass initialization data to the content downloader.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::DownloaderNotInitialized` without a downloader,
    /// or the downloader's own error.
    pub fn initialize_content_downloader(&self, data: &str) -> Result<()> {
        let downloader = self
            .downloader
            .read()
            .clone()
            .ok_or(HandlerError::DownloaderNotInitialized)?;
        downloader.initialize(data)
    }

    /// Download one payload file of `workflow` into its work folder.
    ///
    /// A file already present with a valid hash is not fetched again
    /// (`DownloadSkippedFileExists`); one with a bad hash is deleted first.
    /// The result is re-validated after the downloader reports success.
    pub fn download(
        &self,
        entity: &FileEntity,
        workflow: &Workflow,
        options: &DownloadOptions,
        progress: &ProgressFn,
    ) -> AducResult {
        match self.try_download(entity, workflow, options, progress) {
            Ok(code) => AducResult::from_code(code),
            Err(e) => {
                tracing::error!(
                    workflow_id = %workflow.id(),
                    file_id = %entity.file_id,
                    error = %e,
                    "Download failed"
                );
                if matches!(e, HandlerError::Cancelled) {
                    AducResult::cancelled()
                } else {
                    AducResult::failure(e.extended_code())
                }
            }
        }
    }

    fn try_download(
        &self,
        entity: &FileEntity,
        workflow: &Workflow,
        options: &DownloadOptions,
        progress: &ProgressFn,
    ) -> Result<ResultCode> {
        if workflow.is_cancel_requested() {
            return Err(HandlerError::Cancelled);
        }

        let target = entity.target_path(workflow.work_folder());
        if target.exists() {
            if hash::is_valid(&target, &entity.file_id, &entity.hashes)? {
                tracing::info!(file_id = %entity.file_id, path = %target.display(), "File exists with valid hash, skipping download");
                return Ok(ResultCode::DownloadSkippedFileExists);
            }
            std::fs::remove_file(&target).map_err(|source| HandlerError::DeleteExisting {
                path: target.clone(),
                source,
            })?;
        }

        let downloader = self
            .downloader
            .read()
            .clone()
            .ok_or(HandlerError::DownloaderNotInitialized)?;
        sandbox::ensure(workflow.work_folder())?;

        let cancel = workflow.cancel_token();
        let request = DownloadRequest {
            workflow_id: workflow.id(),
            target: &target,
            retry_timeout: options.retry_timeout,
            cancel: &cancel,
        };
        downloader.download(entity, &request, progress)?;

        if !hash::is_valid(&target, &entity.file_id, &entity.hashes)? {
            return Err(HandlerError::HashMismatch(entity.file_id.clone()));
        }
        Ok(ResultCode::DownloadSuccess)
    }
}

fn parse_components(raw: &str) -> Result<Value> {
    let doc: Value =
        serde_json::from_str(raw).map_err(|e| HandlerError::InvalidComponents(e.to_string()))?;
    if doc.get("components").and_then(Value::as_array).is_none() {
        return Err(HandlerError::InvalidComponents(raw.to_string()));
    }
    Ok(doc)
}
