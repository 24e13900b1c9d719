//! Core types for the device update agent.
//!
//! This crate provides the vocabulary every other crate speaks:
//!
//! - **Results**: `ResultCode` and the `(code, extended code)` pair `AducResult`
//! - **Extended result codes**: facility/component encoding and the named codes
//! - **Update state**: the coarse per-workflow lifecycle enum
//! - **Identifiers**: update ids and `vendor/name:version` update types
//!
//! # Example
//!
//! ```
//! use du_agent_core::{AducResult, ResultCode, UpdateType};
//!
//! let result = AducResult::from_code(ResultCode::InstallRequiredReboot);
//! assert!(result.is_success());
//!
//! let update_type: UpdateType = "microsoft/apt:1".parse().unwrap();
//! assert_eq!(update_type.version(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod erc;
pub mod error;
pub mod ids;
pub mod result;
pub mod state;

pub use error::{CoreError, Result};
pub use ids::{IdError, UpdateId, UpdateType};
pub use result::{AducResult, ResultCode};
pub use state::UpdateState;
