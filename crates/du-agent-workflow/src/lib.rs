//! Workflow data model for the device update agent.
//!
//! A deployment arrives as an *update action* carrying an *update manifest*.
//! This crate parses both, and turns them into a tree of [`Workflow`] nodes:
//!
//! - The root node represents the whole deployment.
//! - Composite handlers grow the tree lazily, one child per step, bundled
//!   update or install item.
//! - Every node records its own result, details and coarse state, and carries
//!   the interrupt flags (reboot / agent restart) a handler requested.
//!
//! Cancellation is cooperative: a single [`CancelToken`] is shared by the root
//! and every descendant, and handlers check it at their own safe points.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use du_agent_workflow::Workflow;
//!
//! let json = std::fs::read_to_string("/tmp/action.json").unwrap();
//! let workflow = Workflow::from_action_json(&json, Path::new("/var/lib/du/downloads")).unwrap();
//! println!("{} has {} step(s)", workflow.id(), workflow.step_count());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod cancel;
pub mod error;
pub mod file_entity;
pub mod manifest;
pub mod sandbox;
pub mod workflow;

pub use action::{UpdateAction, UpdateActionDocument, WorkflowInfo};
pub use cancel::CancelToken;
pub use error::{Result, WorkflowError};
pub use file_entity::{FileEntity, FileHash};
pub use manifest::{
    BundledUpdate, FileMetadata, InlineStep, Instructions, Step, UpdateManifest,
    MIN_SUPPORTED_MANIFEST_VERSION,
};
pub use workflow::{Interrupts, Workflow, MAX_RESULT_DETAILS_LEN};
