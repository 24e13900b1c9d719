//! In-memory store for tests.

use parking_lot::Mutex;

use crate::error::Result;
use crate::InstalledCriteriaStore;

/// Installed-criteria store kept in memory.
#[derive(Debug, Default)]
pub struct MockCriteriaStore {
    records: Mutex<Vec<String>>,
}

impl MockCriteriaStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted criteria, duplicates included, in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }
}

impl InstalledCriteriaStore for MockCriteriaStore {
    fn persist(&self, criteria: &str) -> Result<()> {
        self.records.lock().push(criteria.to_string());
        Ok(())
    }

    fn remove(&self, criteria: &str) -> Result<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r != criteria);
        Ok(before - records.len())
    }

    fn remove_all(&self) -> Result<()> {
        self.records.lock().clear();
        Ok(())
    }

    fn is_installed(&self, criteria: &str) -> bool {
        self.records.lock().iter().any(|r| r == criteria)
    }
}
