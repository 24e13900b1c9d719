//! Record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a criteria record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaState {
    /// The update identified by the criteria is installed.
    Installed,
}

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaRecord {
    /// The opaque criteria string.
    pub installed_criteria: String,
    /// Record state.
    pub state: CriteriaState,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
}

impl CriteriaRecord {
    /// A fresh `installed` record stamped with the current time.
    #[must_use]
    pub fn installed(criteria: &str) -> Self {
        Self {
            installed_criteria: criteria.to_string(),
            state: CriteriaState::Installed,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if this record marks `criteria` as installed.
    #[must_use]
    pub fn matches(&self, criteria: &str) -> bool {
        self.installed_criteria == criteria && self.state == CriteriaState::Installed
    }
}
