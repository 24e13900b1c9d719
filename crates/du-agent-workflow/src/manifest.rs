//! The update manifest model.
//!
//! Manifests of version 4 and later describe an update as a list of
//! *instruction steps*. A step is either inline (a handler plus the files it
//! needs) or a reference to a detached manifest that is downloaded and
//! processed as a nested workflow.

use std::collections::BTreeMap;

use du_agent_core::UpdateId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WorkflowError};
use crate::sandbox;

/// Lowest manifest version the agent processes.
pub const MIN_SUPPORTED_MANIFEST_VERSION: u32 = 4;

/// A parsed update manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    /// Schema version as a decimal string.
    pub manifest_version: String,
    /// Identity of the update.
    pub update_id: UpdateId,
    /// Handler selector for manifests that are not step based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
    /// Opaque string a handler uses to decide whether the update is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_criteria: Option<String>,
    /// Device properties this update is compatible with.
    #[serde(default)]
    pub compatibility: Vec<Map<String, Value>>,
    /// Ordered steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Instructions>,
    /// Payload files keyed by file id.
    #[serde(default)]
    pub files: BTreeMap<String, FileMetadata>,
    /// Nested full manifests processed by the bundle handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundled_updates: Vec<BundledUpdate>,
    /// Creation time, as written by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<String>,
}

impl UpdateManifest {
    /// Parse a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidManifest` if the document is malformed,
    /// or `WorkflowError::UnsafeName` if a file name is not a plain file name.
    pub fn parse(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| WorkflowError::InvalidManifest(e.to_string()))?;
        let inline_bundled = manifest.bundled_updates.iter().filter_map(|b| match b {
            BundledUpdate::File { metadata, .. } => Some(metadata),
            BundledUpdate::FileId(_) => None,
        });
        for metadata in manifest.files.values().chain(inline_bundled) {
            sandbox::check_name("file name", &metadata.file_name)?;
        }
        Ok(manifest)
    }

    /// The manifest version as a number.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidManifest` if the version is not a
    /// decimal number.
    pub fn version(&self) -> Result<u32> {
        let major = self
            .manifest_version
            .split('.')
            .next()
            .unwrap_or_default();
        major.parse().map_err(|_| {
            WorkflowError::InvalidManifest(format!(
                "bad manifest version '{}'",
                self.manifest_version
            ))
        })
    }

    /// Fail unless the manifest version is supported.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::UnsupportedManifestVersion` for versions below
    /// [`MIN_SUPPORTED_MANIFEST_VERSION`].
    pub fn ensure_supported(&self) -> Result<u32> {
        let version = self.version()?;
        if version < MIN_SUPPORTED_MANIFEST_VERSION {
            return Err(WorkflowError::UnsupportedManifestVersion(
                self.manifest_version.clone(),
            ));
        }
        Ok(version)
    }

    /// The declared steps, or an empty slice.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        self.instructions
            .as_ref()
            .map_or(&[], |instructions| instructions.steps.as_slice())
    }
}

/// The `instructions` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Instructions {
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Metadata of one payload file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Name of the file inside the work folder.
    pub file_name: String,
    /// Expected size.
    #[serde(default)]
    pub size_in_bytes: u64,
    /// Base64 digest per hash algorithm, e.g. `sha256`.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Optional handler to produce the file (e.g. from a delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_handler: Option<DownloadHandlerRef>,
    /// Arguments passed to the step handler along with the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Any other property, e.g. merged in from an install item.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// Reference to a download handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHandlerRef {
    /// Download handler id.
    pub id: String,
}

/// One entry of `bundledUpdates`.
///
/// Either a file id declared in `files`, or a self-contained file description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundledUpdate {
    /// A file id declared in `files`.
    FileId(String),
    /// An inline file description.
    File {
        /// File id used to look up the download URL.
        #[serde(rename = "fileId")]
        file_id: String,
        /// File metadata.
        #[serde(flatten)]
        metadata: FileMetadata,
    },
}

impl BundledUpdate {
    /// The file id of this entry.
    #[must_use]
    pub fn file_id(&self) -> &str {
        match self {
            Self::FileId(id) | Self::File { file_id: id, .. } => id,
        }
    }
}

/// An inline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineStep {
    /// Update type of the handler that runs this step.
    pub handler: String,
    /// File ids the step needs.
    #[serde(default)]
    pub files: Vec<String>,
    /// Free-form handler properties.
    #[serde(default)]
    pub handler_properties: Map<String, Value>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One instruction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub enum Step {
    /// The step is described in place.
    Inline(InlineStep),
    /// The step is a detached manifest file.
    Reference {
        /// File id of the detached manifest.
        detached_manifest_file_id: String,
        /// Human-readable description.
        description: Option<String>,
    },
}

impl Step {
    /// Returns true for inline steps.
    #[must_use]
    pub const fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }

    /// The handler of an inline step.
    #[must_use]
    pub fn handler(&self) -> Option<&str> {
        match self {
            Self::Inline(step) => Some(&step.handler),
            Self::Reference { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStep {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handler: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    handler_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detached_manifest_file_id: Option<String>,
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> std::result::Result<Self, Self::Error> {
        match raw.kind.as_deref() {
            None | Some("inline") => {
                let handler = raw
                    .handler
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| "inline step has no handler".to_string())?;
                Ok(Self::Inline(InlineStep {
                    handler,
                    files: raw.files,
                    handler_properties: raw.handler_properties,
                    description: raw.description,
                }))
            }
            Some("reference") => {
                let detached_manifest_file_id = raw
                    .detached_manifest_file_id
                    .ok_or_else(|| "reference step has no detachedManifestFileId".to_string())?;
                Ok(Self::Reference {
                    detached_manifest_file_id,
                    description: raw.description,
                })
            }
            Some(other) => Err(format!("unknown step type '{other}'")),
        }
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        match step {
            Step::Inline(inline) => Self {
                kind: None,
                handler: Some(inline.handler),
                files: inline.files,
                handler_properties: inline.handler_properties,
                description: inline.description,
                detached_manifest_file_id: None,
            },
            Step::Reference {
                detached_manifest_file_id,
                description,
            } => Self {
                kind: Some("reference".to_string()),
                handler: None,
                files: Vec::new(),
                handler_properties: Map::new(),
                description,
                detached_manifest_file_id: Some(detached_manifest_file_id),
            },
        }
    }
}
