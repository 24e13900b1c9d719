//! Deployment driver for the device update agent.
//!
//! The driver owns the outermost workflow of a deployment and walks it
//! through the step table:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │            update action (stdin / --action-file)          │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                          Driver                           │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────┐   │
//! │  │ Step table  │  │ Phase worker │  │ Reboot/restart  │   │
//! │  └─────────────┘  └──────────────┘  └─────────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌────────────┐ ┌────────────┐ ┌────────────┐
//!        │ Extensions │ │  Reporter  │ │  du-shell  │
//!        └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use du_agent::{setup, AgentConfig, Driver, NoopSystemActions, TracingReporter};
//! use du_agent_handlers::{CommandLauncher, ProcessLauncher};
//! use du_agent_store::{InstalledCriteriaStore, JsonFileStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::from_env();
//! let store: Arc<dyn InstalledCriteriaStore> =
//!     Arc::new(JsonFileStore::new(config.installed_criteria_file.clone()));
//! let launcher: Arc<dyn CommandLauncher> =
//!     Arc::new(ProcessLauncher::new(config.launcher_path.clone()));
//!
//! let extensions =
//!     setup::build_extensions(&config, &store, &launcher, tokio::runtime::Handle::current())?;
//! let driver = Driver::new(
//!     Arc::new(extensions),
//!     Arc::new(NoopSystemActions),
//!     Arc::new(TracingReporter),
//!     config,
//! );
//!
//! let action = std::fs::read_to_string("/tmp/action.json")?;
//! let outcome = driver.run_deployment(&action).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod reporter;
pub mod setup;
pub mod system;

pub use config::AgentConfig;
pub use driver::{DeploymentOutcome, Driver, PhaseCompletion};
pub use error::{AgentError, Result};
pub use lifecycle::{StepEntry, WorkflowStep, STEP_TABLE};
pub use reporter::{StateReport, StateReporter, TracingReporter};
pub use system::{LauncherSystemActions, NoopSystemActions, SystemActions};
