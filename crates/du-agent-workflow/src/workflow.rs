//! The recursive workflow node.
//!
//! A parent exclusively owns its children. Children are created lazily by the
//! composite handlers and kept across phases, so the same child nodes see
//! Download, Install and Apply. Dropping the root frees the whole tree.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use du_agent_core::{AducResult, UpdateId, UpdateState};
use serde_json::{json, Map, Value};

use crate::action::{UpdateAction, UpdateActionDocument};
use crate::cancel::CancelToken;
use crate::error::{Result, WorkflowError};
use crate::file_entity::FileEntity;
use crate::manifest::{BundledUpdate, FileMetadata, Step, UpdateManifest};

/// Result details longer than this are truncated.
pub const MAX_RESULT_DETAILS_LEN: usize = 1024;

const INSTALLED_CRITERIA: &str = "installedCriteria";

/// Reboot and agent-restart requests raised while processing a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Interrupts {
    /// A reboot is needed once the workflow completes.
    pub reboot: bool,
    /// A reboot is needed now; remaining work must not run.
    pub immediate_reboot: bool,
    /// An agent restart is needed once the workflow completes.
    pub agent_restart: bool,
    /// An agent restart is needed now; remaining work must not run.
    pub immediate_agent_restart: bool,
}

impl Interrupts {
    /// Combine two sets of requests. Requests are sticky, so this is a union.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            reboot: self.reboot || other.reboot,
            immediate_reboot: self.immediate_reboot || other.immediate_reboot,
            agent_restart: self.agent_restart || other.agent_restart,
            immediate_agent_restart: self.immediate_agent_restart || other.immediate_agent_restart,
        }
    }

    /// Returns true if any reboot was requested.
    #[must_use]
    pub const fn reboot_requested(self) -> bool {
        self.reboot || self.immediate_reboot
    }

    /// Returns true if any agent restart was requested.
    #[must_use]
    pub const fn agent_restart_requested(self) -> bool {
        self.agent_restart || self.immediate_agent_restart
    }

    /// Returns true if an immediate reboot or restart was requested.
    #[must_use]
    pub const fn immediate(self) -> bool {
        self.immediate_reboot || self.immediate_agent_restart
    }
}

/// One unit of update work.
#[derive(Debug)]
pub struct Workflow {
    id: String,
    level: u32,
    action: UpdateAction,
    retry_timestamp: Option<String>,
    manifest: UpdateManifest,
    manifest_signature: Option<String>,
    file_urls: Arc<HashMap<String, String>>,
    installed_criteria: Option<String>,
    handler_properties: Map<String, Value>,
    selected_components: Option<Value>,
    work_folder: PathBuf,
    result: AducResult,
    result_details: String,
    state: UpdateState,
    installed_update_id: Option<String>,
    interrupts: Interrupts,
    cancel: CancelToken,
    children: Vec<Workflow>,
}

impl Workflow {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Build a root workflow from an update action JSON document.
    ///
    /// The work folder is `<sandbox_root>/<workflow id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the action or its manifest cannot be parsed.
    pub fn from_action_json(json: &str, sandbox_root: &Path) -> Result<Self> {
        Self::from_action(UpdateActionDocument::parse(json)?, sandbox_root)
    }

    /// Build a root workflow from an update action file.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::ActionFile` if the file cannot be read, or any
    /// error of [`Workflow::from_action_json`].
    pub fn from_action_file(path: &Path, sandbox_root: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| WorkflowError::ActionFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_action_json(&json, sandbox_root)
    }

    /// Build a root workflow from a parsed update action.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::NoUpdateManifest` if the action carries no
    /// manifest, or `WorkflowError::InvalidManifest` if it cannot be parsed.
    pub fn from_action(doc: UpdateActionDocument, sandbox_root: &Path) -> Result<Self> {
        doc.validate()?;
        let manifest_json = doc
            .update_manifest
            .as_deref()
            .ok_or(WorkflowError::NoUpdateManifest)?;
        let manifest = UpdateManifest::parse(manifest_json)?;
        let id = doc.workflow.id;

        Ok(Self {
            work_folder: sandbox_root.join(&id),
            id,
            level: 0,
            action: doc.workflow.action,
            retry_timestamp: doc.workflow.retry_timestamp,
            installed_criteria: manifest.installed_criteria.clone(),
            manifest,
            manifest_signature: doc.update_manifest_signature,
            file_urls: Arc::new(doc.file_urls),
            handler_properties: Map::new(),
            selected_components: None,
            result: AducResult::default(),
            result_details: String::new(),
            state: UpdateState::Idle,
            installed_update_id: None,
            interrupts: Interrupts::default(),
            cancel: CancelToken::new(),
            children: Vec::new(),
        })
    }

    fn derive_child(&self, id: String, manifest: UpdateManifest, work_folder: PathBuf) -> Self {
        Self {
            id,
            level: self.level + 1,
            action: self.action,
            retry_timestamp: self.retry_timestamp.clone(),
            installed_criteria: manifest.installed_criteria.clone(),
            manifest,
            manifest_signature: None,
            file_urls: Arc::clone(&self.file_urls),
            handler_properties: Map::new(),
            selected_components: None,
            work_folder,
            result: AducResult::default(),
            result_details: String::new(),
            state: UpdateState::Idle,
            installed_update_id: None,
            interrupts: Interrupts::default(),
            cancel: self.cancel.clone(),
            children: Vec::new(),
        }
    }

    /// Build the child node for inline step `index`.
    ///
    /// The child's update type is the step's handler, its files are the ones
    /// the step names, and its installed criteria comes from the step's
    /// handler properties. It shares this node's work folder and inherits the
    /// selected components.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidStepIndex` if `index` is not an inline
    /// step, or `WorkflowError::FileNotFound` if the step names an undeclared
    /// file.
    pub fn child_from_inline_step(&self, index: usize) -> Result<Self> {
        let Some(Step::Inline(step)) = self.manifest.steps().get(index) else {
            return Err(WorkflowError::InvalidStepIndex(index));
        };

        let mut files = BTreeMap::new();
        for file_id in &step.files {
            let metadata = self
                .manifest
                .files
                .get(file_id)
                .ok_or_else(|| WorkflowError::FileNotFound(file_id.clone()))?;
            files.insert(file_id.clone(), metadata.clone());
        }

        let installed_criteria = step
            .handler_properties
            .get(INSTALLED_CRITERIA)
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut manifest = self.manifest.clone();
        manifest.update_type = Some(step.handler.clone());
        manifest.installed_criteria.clone_from(&installed_criteria);
        manifest.instructions = None;
        manifest.bundled_updates.clear();
        manifest.files = files;

        let mut child = self.derive_child(index.to_string(), manifest, self.work_folder.clone());
        child.handler_properties = step.handler_properties.clone();
        child.selected_components.clone_from(&self.selected_components);
        Ok(child)
    }

    /// Build a child node from a detached manifest file already present in
    /// this node's work folder.
    ///
    /// The child's work folder is `<this work folder>/<child_id>`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidManifest` if the file cannot be read or
    /// parsed.
    pub fn child_from_manifest_file(&self, child_id: &str, path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::InvalidManifest(format!("cannot read {}: {e}", path.display()))
        })?;
        let manifest = UpdateManifest::parse(&json)?;
        Ok(self.derive_child(
            child_id.to_string(),
            manifest,
            self.work_folder.join(child_id),
        ))
    }

    /// Build a node for one install item of an instructions file.
    ///
    /// The item's `updateType` replaces this node's update type. Only the
    /// files the item names (matched by file name) are kept, with the item's
    /// file properties merged over the manifest's. The work folder is shared.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidInstruction` if the item is not an
    /// object, or `WorkflowError::InstructionNoUpdateType` if it has no update
    /// type.
    pub fn child_from_instruction(&self, child_id: &str, item: &Value) -> Result<Self> {
        let item = item
            .as_object()
            .ok_or_else(|| WorkflowError::InvalidInstruction("not a JSON object".to_string()))?;
        let update_type = item
            .get("updateType")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(WorkflowError::InstructionNoUpdateType)?;

        let item_files: Vec<&Map<String, Value>> = item
            .get("files")
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default();

        let mut files = BTreeMap::new();
        for (file_id, metadata) in &self.manifest.files {
            let matching = item_files.iter().find(|f| {
                f.get("fileName").and_then(Value::as_str) == Some(metadata.file_name.as_str())
            });
            if let Some(overrides) = matching {
                files.insert(file_id.clone(), merge_file_properties(metadata, overrides)?);
            }
        }

        let mut manifest = self.manifest.clone();
        manifest.update_type = Some(update_type.to_string());
        manifest.instructions = None;
        manifest.bundled_updates.clear();
        manifest.files = files;
        if let Some(criteria) = item.get(INSTALLED_CRITERIA).and_then(Value::as_str) {
            manifest.installed_criteria = Some(criteria.to_string());
        }

        let mut child = self.derive_child(child_id.to_string(), manifest, self.work_folder.clone());
        if let Some(props) = item.get("handlerProperties").and_then(Value::as_object) {
            child.handler_properties = props.clone();
        }
        Ok(child)
    }

    // =========================================================================
    // Identity and manifest
    // =========================================================================

    /// The node id. Children are numbered by their position.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Depth in the tree; the root is level 0.
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// The action this workflow was created for.
    #[must_use]
    pub const fn action(&self) -> UpdateAction {
        self.action
    }

    /// The service's retry marker, if any.
    #[must_use]
    pub fn retry_timestamp(&self) -> Option<&str> {
        self.retry_timestamp.as_deref()
    }

    /// The parsed manifest.
    #[must_use]
    pub const fn manifest(&self) -> &UpdateManifest {
        &self.manifest
    }

    /// The manifest signature, carried opaquely.
    #[must_use]
    pub fn manifest_signature(&self) -> Option<&str> {
        self.manifest_signature.as_deref()
    }

    /// The update type of this node, if declared.
    #[must_use]
    pub fn update_type(&self) -> Option<&str> {
        self.manifest.update_type.as_deref()
    }

    /// The update id declared by the manifest.
    #[must_use]
    pub const fn expected_update_id(&self) -> &UpdateId {
        &self.manifest.update_id
    }

    /// The installed criteria for this node.
    #[must_use]
    pub fn installed_criteria(&self) -> Option<&str> {
        self.installed_criteria.as_deref()
    }

    /// Handler properties of an inline step or install item.
    #[must_use]
    pub const fn handler_properties(&self) -> &Map<String, Value> {
        &self.handler_properties
    }

    /// The compatibility entry at `index`, serialized as JSON.
    #[must_use]
    pub fn compatibility(&self, index: usize) -> Option<String> {
        self.manifest
            .compatibility
            .get(index)
            .map(|entry| Value::Object(entry.clone()).to_string())
    }

    /// The private work folder of this node.
    #[must_use]
    pub fn work_folder(&self) -> &Path {
        &self.work_folder
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Number of payload files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.manifest.files.len()
    }

    /// The payload file at `index`.
    #[must_use]
    pub fn file(&self, index: usize) -> Option<FileEntity> {
        self.manifest
            .files
            .iter()
            .nth(index)
            .map(|(id, metadata)| self.entity(id, metadata))
    }

    /// All payload files.
    #[must_use]
    pub fn files(&self) -> Vec<FileEntity> {
        self.manifest
            .files
            .iter()
            .map(|(id, metadata)| self.entity(id, metadata))
            .collect()
    }

    /// The payload file with the given id.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::FileNotFound` if the id is not declared.
    pub fn file_by_id(&self, file_id: &str) -> Result<FileEntity> {
        self.manifest
            .files
            .get(file_id)
            .map(|metadata| self.entity(file_id, metadata))
            .ok_or_else(|| WorkflowError::FileNotFound(file_id.to_string()))
    }

    fn entity(&self, file_id: &str, metadata: &FileMetadata) -> FileEntity {
        FileEntity::from_metadata(file_id, metadata, self.file_urls.get(file_id).cloned())
    }

    /// Number of bundled update manifests.
    #[must_use]
    pub fn bundled_update_count(&self) -> usize {
        self.manifest.bundled_updates.len()
    }

    /// The manifest file of bundled update `index`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::FileNotFound` if the index is out of range or
    /// the entry names an undeclared file.
    pub fn bundled_update_file(&self, index: usize) -> Result<FileEntity> {
        match self.manifest.bundled_updates.get(index) {
            Some(BundledUpdate::FileId(id)) => self.file_by_id(id),
            Some(BundledUpdate::File { file_id, metadata }) => Ok(self.entity(file_id, metadata)),
            None => Err(WorkflowError::FileNotFound(format!("bundled update #{index}"))),
        }
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Number of instruction steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.manifest.steps().len()
    }

    /// The step at `index`.
    #[must_use]
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.manifest.steps().get(index)
    }

    /// The detached manifest file of reference step `index`.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidStepIndex` if the step is not a
    /// reference step, or `WorkflowError::FileNotFound` if the file is not
    /// declared.
    pub fn detached_manifest_file(&self, index: usize) -> Result<FileEntity> {
        match self.step(index) {
            Some(Step::Reference {
                detached_manifest_file_id,
                ..
            }) => self.file_by_id(detached_manifest_file_id),
            _ => Err(WorkflowError::InvalidStepIndex(index)),
        }
    }

    // =========================================================================
    // Selected components
    // =========================================================================

    /// The `{"components": [...]}` document selected for this node.
    #[must_use]
    pub const fn selected_components(&self) -> Option<&Value> {
        self.selected_components.as_ref()
    }

    /// Replace the selected components.
    pub fn set_selected_components(&mut self, components: Option<Value>) {
        self.selected_components = components;
    }

    /// The selected components array, or `None` if nothing was selected.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidComponents` if the selection has no
    /// `components` array.
    pub fn component_list(&self) -> Result<Option<&Vec<Value>>> {
        let Some(selection) = &self.selected_components else {
            return Ok(None);
        };
        selection
            .get("components")
            .and_then(Value::as_array)
            .map(Some)
            .ok_or_else(|| WorkflowError::InvalidComponents(selection.to_string()))
    }

    /// Wrap one component into a selection document.
    #[must_use]
    pub fn single_component_selection(component: &Value) -> Value {
        json!({ "components": [component] })
    }

    // =========================================================================
    // Results and state
    // =========================================================================

    /// The last recorded result.
    #[must_use]
    pub const fn result(&self) -> AducResult {
        self.result
    }

    /// Record a result.
    pub fn set_result(&mut self, result: AducResult) {
        self.result = result;
    }

    /// Diagnostic text accompanying the result.
    #[must_use]
    pub fn result_details(&self) -> &str {
        &self.result_details
    }

    /// Replace the result details, truncated to [`MAX_RESULT_DETAILS_LEN`]
    /// bytes on a character boundary.
    pub fn set_result_details(&mut self, details: impl Into<String>) {
        let mut details = details.into();
        if details.len() > MAX_RESULT_DETAILS_LEN {
            let mut end = MAX_RESULT_DETAILS_LEN;
            while !details.is_char_boundary(end) {
                end -= 1;
            }
            details.truncate(end);
        }
        self.result_details = details;
    }

    /// The coarse lifecycle state.
    #[must_use]
    pub const fn state(&self) -> UpdateState {
        self.state
    }

    /// Set the coarse lifecycle state.
    pub fn set_state(&mut self, state: UpdateState) {
        self.state = state;
    }

    /// Record a phase outcome: the result, and `success_state` or
    /// `UpdateState::Failed` depending on it.
    pub fn record(&mut self, result: AducResult, success_state: UpdateState) {
        self.result = result;
        self.state = if result.is_success() {
            success_state
        } else {
            UpdateState::Failed
        };
    }

    /// The update id recorded as installed by this workflow.
    #[must_use]
    pub fn installed_update_id(&self) -> Option<&str> {
        self.installed_update_id.as_deref()
    }

    /// Record the installed update id.
    pub fn set_installed_update_id(&mut self, id: impl Into<String>) {
        self.installed_update_id = Some(id.into());
    }

    // =========================================================================
    // Interrupts and cancellation
    // =========================================================================

    /// Reboot and restart requests raised on this node.
    #[must_use]
    pub const fn interrupts(&self) -> Interrupts {
        self.interrupts
    }

    /// Fold requests raised by a child into this node.
    pub fn merge_interrupts(&mut self, other: Interrupts) {
        self.interrupts = self.interrupts.merge(other);
    }

    /// Request a deferred reboot.
    pub fn request_reboot(&mut self) {
        self.interrupts.reboot = true;
    }

    /// Request an immediate reboot.
    pub fn request_immediate_reboot(&mut self) {
        self.interrupts.immediate_reboot = true;
    }

    /// Request a deferred agent restart.
    pub fn request_agent_restart(&mut self) {
        self.interrupts.agent_restart = true;
    }

    /// Request an immediate agent restart.
    pub fn request_immediate_agent_restart(&mut self) {
        self.interrupts.immediate_agent_restart = true;
    }

    /// A handle to the cancellation flag of this tree.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns true once cancellation was requested anywhere in the tree.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Request cancellation of this tree.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    // =========================================================================
    // Children
    // =========================================================================

    /// Child nodes in order.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Number of child nodes.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// The child at `index`.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<&Self> {
        self.children.get(index)
    }

    /// The child at `index`, mutably.
    pub fn child_mut(&mut self, index: usize) -> Option<&mut Self> {
        self.children.get_mut(index)
    }

    /// Append a child.
    pub fn push_child(&mut self, child: Self) {
        self.children.push(child);
    }

    /// Discard all children.
    pub fn clear_children(&mut self) {
        self.children.clear();
    }
}

fn merge_file_properties(
    metadata: &FileMetadata,
    overrides: &Map<String, Value>,
) -> Result<FileMetadata> {
    let mut merged = serde_json::to_value(metadata)
        .map_err(|e| WorkflowError::InvalidInstruction(e.to_string()))?;
    if let Some(target) = merged.as_object_mut() {
        for (key, value) in overrides {
            target.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged).map_err(|e| WorkflowError::InvalidInstruction(e.to_string()))
}
