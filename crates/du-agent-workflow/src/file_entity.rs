//! Downloadable payload descriptions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::manifest::FileMetadata;

/// One hash of a payload file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    /// Hash algorithm name, e.g. `sha256`.
    pub alg: String,
    /// Base64 digest.
    pub value: String,
}

/// Everything needed to fetch and verify one payload file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntity {
    /// File id as declared in the manifest.
    pub file_id: String,
    /// Name of the file inside the work folder.
    pub target_filename: String,
    /// Where to fetch the file from. Resolved from the action's `fileUrls`.
    pub download_uri: Option<String>,
    /// Accepted digests; at least one must match.
    pub hashes: Vec<FileHash>,
    /// Expected size.
    pub size_in_bytes: u64,
    /// Arguments passed along with the file.
    pub arguments: Option<String>,
    /// Download handler id, if the file is produced by a download handler.
    pub download_handler_id: Option<String>,
}

impl FileEntity {
    /// Build an entity from manifest metadata.
    #[must_use]
    pub fn from_metadata(
        file_id: &str,
        metadata: &FileMetadata,
        download_uri: Option<String>,
    ) -> Self {
        Self {
            file_id: file_id.to_string(),
            target_filename: metadata.file_name.clone(),
            download_uri,
            hashes: metadata
                .hashes
                .iter()
                .map(|(alg, value)| FileHash {
                    alg: alg.clone(),
                    value: value.clone(),
                })
                .collect(),
            size_in_bytes: metadata.size_in_bytes,
            arguments: metadata.arguments.clone(),
            download_handler_id: metadata.download_handler.as_ref().map(|h| h.id.clone()),
        }
    }

    /// Path of this file inside `work_folder`.
    #[must_use]
    pub fn target_path(&self, work_folder: &Path) -> PathBuf {
        work_folder.join(&self.target_filename)
    }
}
