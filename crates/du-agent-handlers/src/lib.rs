//! Content handlers for the device update agent.
//!
//! A content handler carries out the phases of one update type (download,
//! backup, install, apply, restore, cancel, is-installed) on a
//! [`du_agent_workflow::Workflow`] node. This crate provides:
//!
//! - The [`ContentHandler`] contract and the [`ExtensionManager`] that maps
//!   update types to handler instances.
//! - The composite handlers: [`StepsHandler`] for multi-step manifests,
//!   [`ComponentsHandler`] for per-component install items and
//!   [`BundleHandler`] for bundles of full manifests.
//! - Leaves: [`ShellCommandHandler`] delegating to `du-shell`, and the
//!   scripted [`SimulatorHandler`].
//! - The collaborator contracts: [`ComponentEnumerator`] and
//!   [`ContentDownloader`], with HTTP and local-file downloaders.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use du_agent_handlers::{ContentHandler, DownloadOptions, ExtensionManager, StepsHandler};
//! use du_agent_workflow::Workflow;
//!
//! let extensions = ExtensionManager::new();
//! extensions.register_handler("microsoft/update-manifest:5", || {
//!     Ok(Arc::new(StepsHandler::new(DownloadOptions::default())) as Arc<dyn ContentHandler>)
//! });
//!
//! let json = std::fs::read_to_string("/tmp/action.json").unwrap();
//! let mut workflow = Workflow::from_action_json(&json, Path::new("/var/lib/du/downloads")).unwrap();
//! let handler = extensions.load_handler("microsoft/update-manifest:5").unwrap();
//! let result = handler.download(&extensions, &mut workflow);
//! println!("download: {result}");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod components;
mod composite;
pub mod downloader;
pub mod enumerator;
pub mod error;
pub mod handler;
pub mod hash;
pub mod registry;
pub mod shell;
pub mod simulator;
pub mod steps;
pub mod translate;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use bundle::BundleHandler;
pub use components::ComponentsHandler;
pub use downloader::{
    log_progress, ContentDownloader, DownloadOptions, DownloadProgress, DownloadProgressState,
    FileCopyDownloader, HttpContentDownloader,
};
pub use enumerator::{ComponentEnumerator, InventoryEnumerator};
pub use error::{HandlerError, Result};
pub use handler::{check_cancelled, guarded, ContentHandler};
pub use registry::ExtensionManager;
pub use shell::{CommandLauncher, ProcessLauncher, ShellCommandHandler};
pub use simulator::{Operation, SimulatorHandler, SimulatorScript};
pub use steps::{StepsHandler, DEFAULT_REF_STEP_HANDLER};
pub use translate::{translate, Disposition, Translation};
