//! JSON file implementation of the installed-criteria store.
//!
//! The file holds a JSON array of [`CriteriaRecord`]s. Every operation reads
//! the whole file, and writes go through a temporary file and a rename so a
//! crash never leaves a truncated array behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::types::CriteriaRecord;
use crate::InstalledCriteriaStore;

/// Installed-criteria store backed by one JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. A missing file yields no records.
    fn load(&self) -> Result<Vec<CriteriaRecord>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn save(&self, records: &[CriteriaRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl InstalledCriteriaStore for JsonFileStore {
    fn persist(&self, criteria: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut records = self.load()?;
        records.push(CriteriaRecord::installed(criteria));
        self.save(&records)?;
        tracing::info!(criteria, path = %self.path.display(), "Persisted installed criteria");
        Ok(())
    }

    fn remove(&self, criteria: &str) -> Result<usize> {
        let _guard = self.lock.lock();
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.installed_criteria != criteria);
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records)?;
            tracing::info!(criteria, removed, "Removed installed criteria");
        }
        Ok(removed)
    }

    fn remove_all(&self) -> Result<()> {
        let _guard = self.lock.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_installed(&self, criteria: &str) -> bool {
        let _guard = self.lock.lock();
        match self.load() {
            Ok(records) => records.iter().any(|r| r.matches(criteria)),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Cannot read installed criteria");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state/installedcriteria"));
        (store, dir)
    }

    #[test]
    fn persist_creates_parent_directory() {
        let (store, _dir) = create_test_store();
        store.persist("a").unwrap();
        assert!(store.path().exists());
        assert!(store.is_installed("a"));
        assert!(!store.is_installed("b"));
    }

    #[test]
    fn remove_on_missing_file_is_ok() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.remove("a").unwrap(), 0);
        store.remove_all().unwrap();
    }

    #[test]
    fn corrupt_file_reads_as_not_installed_but_fails_writes() {
        let (store, _dir) = create_test_store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{not json").unwrap();

        assert!(!store.is_installed("a"));
        assert!(matches!(
            store.persist("a"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn records_carry_state_and_timestamp() {
        let (store, _dir) = create_test_store();
        store.persist("fw-1").unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["installedCriteria"], "fw-1");
        assert_eq!(raw[0]["state"], "installed");
        assert!(raw[0]["timestamp"].as_str().unwrap().contains('T'));
    }
}
