//! Component enumerator collaborator.
//!
//! An enumerator knows the device's sub-units (motors, cameras, ...) and
//! picks the ones a compatibility selector targets. Both operations return a
//! `{"components": [...]}` document as JSON text.

use std::path::PathBuf;

use serde_json::{json, Map, Value};

use crate::error::{HandlerError, Result};

/// Selects device components.
pub trait ComponentEnumerator: Send + Sync {
    /// Return the components matching `selector_json`, a JSON object of
    /// property names and values.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector or the inventory cannot be read.
    fn select_components(&self, selector_json: &str) -> Result<String>;

    /// Return every known component.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory cannot be read.
    fn get_all_components(&self) -> Result<String>;
}

/// An enumerator backed by a JSON inventory file of the form
/// `{"components": [{"id": .., "name": .., "group": .., "properties": {..}}]}`.
///
/// A component matches when every selector entry equals either the
/// component's own field or the same key under its `properties`.
#[derive(Debug, Clone)]
pub struct InventoryEnumerator {
    path: PathBuf,
}

impl InventoryEnumerator {
    /// Create an enumerator reading `path` on every call.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn inventory(&self) -> Result<Vec<Value>> {
        let data = std::fs::read_to_string(&self.path)?;
        let doc: Value = serde_json::from_str(&data)
            .map_err(|e| HandlerError::InvalidComponents(e.to_string()))?;
        doc.get("components")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| HandlerError::InvalidComponents("missing components array".to_string()))
    }
}

fn matches(component: &Value, selector: &Map<String, Value>) -> bool {
    selector.iter().all(|(key, wanted)| {
        component.get(key) == Some(wanted)
            || component
                .get("properties")
                .and_then(|p| p.get(key))
                .is_some_and(|v| v == wanted)
    })
}

impl ComponentEnumerator for InventoryEnumerator {
    fn select_components(&self, selector_json: &str) -> Result<String> {
        let selector: Map<String, Value> = serde_json::from_str(selector_json)
            .map_err(|e| HandlerError::SelectComponents(format!("bad selector: {e}")))?;
        let selected: Vec<Value> = self
            .inventory()?
            .into_iter()
            .filter(|c| matches(c, &selector))
            .collect();
        tracing::debug!(selector = %selector_json, count = selected.len(), "Selected components");
        Ok(json!({ "components": selected }).to_string())
    }

    fn get_all_components(&self) -> Result<String> {
        Ok(json!({ "components": self.inventory()? }).to_string())
    }
}
