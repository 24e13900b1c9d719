//! Workflow state reporting.
//!
//! The wire format towards the service is not defined here. The driver hands
//! every state change to a [`StateReporter`]; the default one logs it.

use async_trait::async_trait;
use du_agent_core::{AducResult, UpdateState};
use serde::Serialize;

/// A state change of the running deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReport {
    /// Workflow the report is about.
    pub workflow_id: String,
    /// New coarse state.
    pub state: UpdateState,
    /// Result of the step that led to the state.
    pub result: AducResult,
    /// Diagnostic text recorded by the handlers.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
    /// The update now on the device, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_update_id: Option<String>,
}

/// Receives state changes.
#[async_trait]
pub trait StateReporter: Send + Sync {
    /// Deliver one report. Delivery failures are the reporter's concern.
    async fn report(&self, report: StateReport);
}

/// Logs every report through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

#[async_trait]
impl StateReporter for TracingReporter {
    async fn report(&self, report: StateReport) {
        if report.result.is_failure() {
            tracing::warn!(
                workflow_id = %report.workflow_id,
                state = ?report.state,
                result = %report.result,
                details = %report.details,
                "Workflow state"
            );
        } else {
            tracing::info!(
                workflow_id = %report.workflow_id,
                state = ?report.state,
                result = %report.result,
                installed_update_id = report.installed_update_id.as_deref().unwrap_or_default(),
                "Workflow state"
            );
        }
    }
}

/// A reporter that keeps every report.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::{async_trait, StateReport, StateReporter};
    use du_agent_core::UpdateState;
    use parking_lot::Mutex;

    /// Collects reports in order.
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        reports: Mutex<Vec<StateReport>>,
    }

    impl RecordingReporter {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every report so far.
        #[must_use]
        pub fn reports(&self) -> Vec<StateReport> {
            self.reports.lock().clone()
        }

        /// The reported states, in order.
        #[must_use]
        pub fn states(&self) -> Vec<UpdateState> {
            self.reports.lock().iter().map(|r| r.state).collect()
        }
    }

    #[async_trait]
    impl StateReporter for RecordingReporter {
        async fn report(&self, report: StateReport) {
            self.reports.lock().push(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use du_agent_core::ResultCode;

    #[test]
    fn report_serializes_camel_case() {
        let report = StateReport {
            workflow_id: "wf-1".to_string(),
            state: UpdateState::Idle,
            result: AducResult::from_code(ResultCode::ApplySuccess),
            details: String::new(),
            installed_update_id: Some("Contoso/Toaster:1.0".to_string()),
        };

        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["workflowId"], "wf-1");
        assert_eq!(json["state"], "idle");
        assert_eq!(json["result"]["resultCode"], 700);
        assert_eq!(json["installedUpdateId"], "Contoso/Toaster:1.0");
        assert!(json.get("details").is_none());
    }
}
