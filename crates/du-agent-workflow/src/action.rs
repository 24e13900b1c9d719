//! The update action document delivered by the service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::sandbox;

/// The action requested by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum UpdateAction {
    /// Download, install and apply the update described by the manifest.
    ProcessDeployment = 3,
    /// Cancel the deployment in progress.
    Cancel = 255,
}

impl UpdateAction {
    /// Convert the action to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to an `UpdateAction`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Self::ProcessDeployment),
            255 => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl TryFrom<u8> for UpdateAction {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| format!("unknown update action {value}"))
    }
}

impl From<UpdateAction> for u8 {
    fn from(action: UpdateAction) -> Self {
        action.as_u8()
    }
}

/// The `workflow` section of an update action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInfo {
    /// Workflow id, stable for the whole deployment.
    pub id: String,
    /// Requested action.
    pub action: UpdateAction,
    /// Set by the service when it re-sends a deployment to force a retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_timestamp: Option<String>,
}

/// An update action as received from the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateActionDocument {
    /// Workflow id and requested action.
    pub workflow: WorkflowInfo,
    /// The update manifest, itself a serialized JSON document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_manifest: Option<String>,
    /// Signature over the manifest. Carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_manifest_signature: Option<String>,
    /// Download URL per file id.
    #[serde(default)]
    pub file_urls: HashMap<String, String>,
}

impl UpdateActionDocument {
    /// Parse an update action from JSON.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidAction` if the document is malformed, or
    /// any error of [`UpdateActionDocument::validate`].
    pub fn parse(json: &str) -> Result<Self> {
        let doc: Self =
            serde_json::from_str(json).map_err(|e| WorkflowError::InvalidAction(e.to_string()))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Check the workflow id. It names the work folder under the sandbox
    /// root, so it must be a plain file name.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::MissingWorkflowId` if the id is empty and
    /// `WorkflowError::UnsafeName` if it is not a single path component.
    pub fn validate(&self) -> Result<()> {
        if self.workflow.id.is_empty() {
            return Err(WorkflowError::MissingWorkflowId);
        }
        sandbox::check_name("workflow id", &self.workflow.id)
    }

    /// The requested action.
    #[must_use]
    pub const fn action(&self) -> UpdateAction {
        self.workflow.action
    }
}
