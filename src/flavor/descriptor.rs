//! Model descriptor (the `MLmodel.json` manifest)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::signature::ModelSignature;
use crate::Result;

/// File name of the descriptor inside a saved model directory.
pub const MODEL_DESCRIPTOR_FILE: &str = "MLmodel.json";

/// One declared flavor: its name and flavor-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlavorEntry {
    /// Flavor name, the registry key
    pub name: String,
    /// Opaque flavor configuration written by `save`
    #[serde(default)]
    pub config: Value,
}

/// Manifest describing a saved model.
///
/// Written once, after every model file, when the model is saved. Readers
/// keep unknown top-level fields in [`ModelDescriptor::extra`] and write
/// them back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    flavors: Vec<FlavorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<ModelSignature>,
    utc_time_created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    model_uuid: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    generator_version: String,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl ModelDescriptor {
    /// A descriptor with no flavors, stamped now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flavors: Vec::new(),
            signature: None,
            utc_time_created: Utc::now(),
            run_id: None,
            artifact_path: None,
            model_uuid: Uuid::new_v4().simple().to_string(),
            dependencies: Vec::new(),
            generator_version: format!("trueno-track {}", env!("CARGO_PKG_VERSION")),
            extra: BTreeMap::new(),
        }
    }

    /// Declared flavors, in the order they were written.
    #[must_use]
    pub fn flavors(&self) -> &[FlavorEntry] {
        &self.flavors
    }

    /// Names of the declared flavors.
    #[must_use]
    pub fn flavor_names(&self) -> Vec<String> {
        self.flavors.iter().map(|f| f.name.clone()).collect()
    }

    /// Configuration of a declared flavor.
    #[must_use]
    pub fn flavor(&self, name: &str) -> Option<&Value> {
        self.flavors.iter().find(|f| f.name == name).map(|f| &f.config)
    }

    /// Recorded signature.
    #[must_use]
    pub const fn signature(&self) -> Option<&ModelSignature> {
        self.signature.as_ref()
    }

    /// Creation time.
    #[must_use]
    pub const fn utc_time_created(&self) -> DateTime<Utc> {
        self.utc_time_created
    }

    /// Source run, if the model was logged to one.
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Artifact path within the run.
    #[must_use]
    pub fn artifact_path(&self) -> Option<&str> {
        self.artifact_path.as_deref()
    }

    /// Unique id of this saved model. Empty for manifests written without one.
    #[must_use]
    pub fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    /// Declared runtime dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Library version that wrote the descriptor.
    #[must_use]
    pub fn generator_version(&self) -> &str {
        &self.generator_version
    }

    /// Unknown top-level fields preserved from the source document.
    #[must_use]
    pub const fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub(crate) fn push_flavor(&mut self, name: impl Into<String>, config: Value) {
        self.flavors.push(FlavorEntry {
            name: name.into(),
            config,
        });
    }

    pub(crate) fn set_signature(&mut self, signature: Option<ModelSignature>) {
        self.signature = signature;
    }

    pub(crate) fn set_run(&mut self, run_id: Option<String>, artifact_path: Option<String>) {
        self.run_id = run_id;
        self.artifact_path = artifact_path;
    }

    pub(crate) fn set_dependencies(&mut self, dependencies: Vec<String>) {
        self.dependencies = dependencies;
    }

    pub(crate) fn insert_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Serialization failures map to `InvalidArgument`.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse from JSON bytes.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for malformed documents.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_fields_are_preserved() {
        let doc = json!({
            "flavors": [{"name": "linear", "config": {"model_file": "model.json"}}],
            "utc_time_created": "2025-01-01T00:00:00Z",
            "model_uuid": "abc",
            "saved_input_example_info": {"type": "dataframe"},
            "databricks_runtime": "14.3"
        });
        let descriptor = ModelDescriptor::from_json(doc.to_string().as_bytes()).unwrap();
        assert_eq!(descriptor.flavor_names(), vec!["linear"]);
        assert_eq!(descriptor.extra().len(), 2);

        let written: Value = serde_json::from_slice(&descriptor.to_json().unwrap()).unwrap();
        assert_eq!(written["databricks_runtime"], "14.3");
        assert_eq!(written["saved_input_example_info"]["type"], "dataframe");
    }

    #[test]
    fn test_minimal_manifest_without_model_uuid() {
        let bytes = br#"{"flavors":[{"name":"linear","config":{}}],"utc_time_created":"2024-01-01T00:00:00Z","run_id":"r1"}"#;
        let descriptor = ModelDescriptor::from_json(bytes).unwrap();
        assert_eq!(descriptor.flavor_names(), vec!["linear"]);
        assert_eq!(descriptor.run_id(), Some("r1"));
        assert_eq!(descriptor.model_uuid(), "");
        assert!(descriptor.extra().is_empty());

        let written: Value = serde_json::from_slice(&descriptor.to_json().unwrap()).unwrap();
        assert!(written.get("model_uuid").is_none());
    }

    #[test]
    fn test_flavor_order_is_kept() {
        let mut descriptor = ModelDescriptor::new();
        descriptor.push_flavor("native", json!({}));
        descriptor.push_flavor("linear", json!({"k": 1}));
        assert_eq!(descriptor.flavor_names(), vec!["native", "linear"]);
        assert_eq!(descriptor.flavor("linear"), Some(&json!({"k": 1})));
        assert!(descriptor.flavor("missing").is_none());
    }

    #[test]
    fn test_malformed_descriptor() {
        let err = ModelDescriptor::from_json(b"{\"flavors\": 3}").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
