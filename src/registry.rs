//! Index and ingest-pipeline definitions.
//!
//! Definitions are registered explicitly through [`IndexRegistryBuilder`],
//! either directly or through a loader closure. Discovery is deterministic:
//! indexes are returned sorted by name and pipelines sorted by id, so repeated
//! destroy/reset/warm runs walk artifacts in the same order.
//!
//! A definition that fails to load or validate is skipped with a warning; it
//! never makes the whole registry unusable.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = IndexRegistry::builder()
//!     .index(IndexDefinition::new("listing", json!({}), json!({"properties": {}})))
//!     .pipeline(PipelineDefinition::new("strip-html", "Remove markup", vec![]))
//!     .build();
//!
//! for index in registry.discover_indexes() {
//!     println!("{}", index.name);
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("\"{0}\" is not a valid index name")]
    InvalidName(String),

    #[error("{field} of \"{name}\" must be a JSON object")]
    NotAnObject { name: String, field: &'static str },

    #[error("failed to load \"{name}\": {message}")]
    Load { name: String, message: String },
}

/// Settings and field mapping for one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    #[serde(default = "empty_object")]
    pub settings: Value,
    #[serde(default = "empty_object")]
    pub mappings: Value,
}

fn empty_object() -> Value {
    json!({})
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, settings: Value, mappings: Value) -> Self {
        Self {
            name: name.into(),
            settings,
            mappings,
        }
    }

    /// Request body used to create the index.
    pub fn create_body(&self) -> Value {
        json!({
            "settings": self.settings,
            "mappings": self.mappings,
        })
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        validate_index_name(&self.name)?;
        for (field, value) in [("settings", &self.settings), ("mappings", &self.mappings)] {
            if !value.is_object() {
                return Err(RegistryError::NotAnObject {
                    name: self.name.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

/// A server-side pre-processing pipeline applied at index time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub processors: Vec<Value>,
}

impl PipelineDefinition {
    pub fn new(id: impl Into<String>, description: impl Into<String>, processors: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            processors,
        }
    }

    /// Request body used to put the pipeline.
    pub fn put_body(&self) -> Value {
        json!({
            "description": self.description,
            "processors": self.processors,
        })
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::InvalidName(self.id.clone()));
        }
        if self.processors.iter().any(|p| !p.is_object()) {
            return Err(RegistryError::NotAnObject {
                name: self.id.clone(),
                field: "processors",
            });
        }
        Ok(())
    }
}

/// Check a name against the cluster's index naming rules.
pub fn validate_index_name(name: &str) -> Result<(), RegistryError> {
    const FORBIDDEN: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ' ', ':'];
    let valid = !name.is_empty()
        && name.len() <= 255
        && name != "."
        && name != ".."
        && !name.starts_with(['-', '_', '+'])
        && !name.contains(FORBIDDEN)
        && name.chars().all(|c| !c.is_uppercase());
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

/// Registered index and pipeline definitions.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    indexes: Vec<IndexDefinition>,
    pipelines: Vec<PipelineDefinition>,
}

impl IndexRegistry {
    pub fn builder() -> IndexRegistryBuilder {
        IndexRegistryBuilder::default()
    }

    /// All index definitions, sorted by name.
    pub fn discover_indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// All pipeline definitions, sorted by id.
    pub fn discover_pipelines(&self) -> &[PipelineDefinition] {
        &self.pipelines
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn pipeline(&self, id: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.id == id)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.name.clone()).collect()
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        self.pipelines.iter().map(|p| p.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty() && self.pipelines.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct IndexRegistryBuilder {
    indexes: BTreeMap<String, IndexDefinition>,
    pipelines: BTreeMap<String, PipelineDefinition>,
    skipped: Vec<RegistryError>,
}

impl IndexRegistryBuilder {
    pub fn index(mut self, definition: IndexDefinition) -> Self {
        self.add_index(Ok(definition));
        self
    }

    /// Register an index whose definition is produced lazily (e.g. read from disk).
    pub fn index_loader<F>(mut self, name: &str, load: F) -> Self
    where
        F: FnOnce() -> Result<IndexDefinition, RegistryError>,
    {
        let result = load().map_err(|e| match e {
            RegistryError::Load { .. } => e,
            other => RegistryError::Load {
                name: name.to_string(),
                message: other.to_string(),
            },
        });
        self.add_index(result);
        self
    }

    pub fn pipeline(mut self, definition: PipelineDefinition) -> Self {
        self.add_pipeline(Ok(definition));
        self
    }

    pub fn pipeline_loader<F>(mut self, id: &str, load: F) -> Self
    where
        F: FnOnce() -> Result<PipelineDefinition, RegistryError>,
    {
        let result = load().map_err(|e| RegistryError::Load {
            name: id.to_string(),
            message: e.to_string(),
        });
        self.add_pipeline(result);
        self
    }

    fn add_index(&mut self, result: Result<IndexDefinition, RegistryError>) {
        let definition = match result.and_then(|d| d.validate().map(|_| d)) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "skipping index definition");
                self.skipped.push(e);
                return;
            }
        };
        if self.indexes.contains_key(&definition.name) {
            warn!(index = %definition.name, "duplicate index definition skipped");
            return;
        }
        self.indexes.insert(definition.name.clone(), definition);
    }

    fn add_pipeline(&mut self, result: Result<PipelineDefinition, RegistryError>) {
        let definition = match result.and_then(|d| d.validate().map(|_| d)) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "skipping pipeline definition");
                self.skipped.push(e);
                return;
            }
        };
        if self.pipelines.contains_key(&definition.id) {
            warn!(pipeline = %definition.id, "duplicate pipeline definition skipped");
            return;
        }
        self.pipelines.insert(definition.id.clone(), definition);
    }

    /// Definitions rejected so far.
    pub fn skipped(&self) -> &[RegistryError] {
        &self.skipped
    }

    pub fn build(self) -> IndexRegistry {
        IndexRegistry {
            indexes: self.indexes.into_values().collect(),
            pipelines: self.pipelines.into_values().collect(),
        }
    }
}
