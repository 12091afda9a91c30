//! Workflow templates and field patching.
//!
//! A workflow is the API-format JSON document ComfyUI executes: an
//! object keyed by node id, each node carrying an `inputs` object.
//! The bridge holds one parsed template per operation and patches a
//! deep copy per request -- the held template is never mutated, so a
//! retry always starts from pristine inputs.

use std::path::Path;

use serde_json::Value;

/// One field write into a workflow: `nodes[node].inputs[field] = value`.
#[derive(Debug, Clone)]
pub struct Patch {
    pub node: String,
    pub field: String,
    pub value: Value,
}

impl Patch {
    pub fn new(node: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
            value,
        }
    }

    /// Patch writing a fresh 64-bit random sampler seed.
    ///
    /// Applied per submission so a resubmitted job never reuses the
    /// previous attempt's seed.
    pub fn random_seed(node: impl Into<String>) -> Self {
        Self::new(node, "seed", Value::from(rand::random::<u64>()))
    }
}

/// A parsed workflow template.
#[derive(Debug, Clone)]
pub struct Workflow {
    nodes: serde_json::Map<String, Value>,
}

impl Workflow {
    /// Parse a workflow from its JSON document. The document must be
    /// an object keyed by node id.
    pub fn parse(document: Value) -> Result<Self, WorkflowError> {
        match document {
            Value::Object(nodes) => Ok(Self { nodes }),
            other => Err(WorkflowError::NotAnObject {
                found: json_type_name(&other),
            }),
        }
    }

    /// Load and parse a workflow file saved via ComfyUI's
    /// "Save (API Format)".
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WorkflowError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let document: Value =
            serde_json::from_str(&text).map_err(|source| WorkflowError::InvalidJson {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(document)
    }

    /// Apply `patches` to a deep copy of this workflow.
    ///
    /// Each patch is validated against the template before anything is
    /// sent to the engine: a missing node or input field fails with a
    /// diagnostic naming exactly what is missing. `self` is never
    /// modified.
    pub fn patched(&self, patches: &[Patch]) -> Result<Workflow, WorkflowError> {
        let mut copy = self.clone();
        for patch in patches {
            copy.set_input(&patch.node, &patch.field, patch.value.clone())?;
        }
        Ok(copy)
    }

    /// The JSON document to submit as the `prompt` payload.
    pub fn to_json(&self) -> Value {
        Value::Object(self.nodes.clone())
    }

    /// Read back an input field. Mostly useful in tests and error paths.
    pub fn input(&self, node: &str, field: &str) -> Option<&Value> {
        self.nodes.get(node)?.get("inputs")?.get(field)
    }

    fn set_input(&mut self, node: &str, field: &str, value: Value) -> Result<(), WorkflowError> {
        let node_value = self.nodes.get_mut(node).ok_or_else(|| WorkflowError::NodeMissing {
            node: node.to_string(),
        })?;

        let inputs = node_value
            .get_mut("inputs")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| WorkflowError::FieldMissing {
                node: node.to_string(),
                field: field.to_string(),
            })?;

        // Only existing fields may be patched: a typo'd field name must
        // surface as an error, not silently extend the node.
        let slot = inputs.get_mut(field).ok_or_else(|| WorkflowError::FieldMissing {
            node: node.to_string(),
            field: field.to_string(),
        })?;
        *slot = value;
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors loading or patching a workflow template.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The workflow file could not be read.
    #[error("Failed to read workflow file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The workflow file is not valid JSON.
    #[error("Workflow file {path} is not valid JSON: {source}")]
    InvalidJson {
        path: String,
        source: serde_json::Error,
    },

    /// The workflow document is not an object keyed by node id.
    #[error("Workflow must be a JSON object keyed by node id, found {found}")]
    NotAnObject { found: &'static str },

    /// A patch targeted a node id the template does not contain.
    #[error("Node {node} not found in workflow")]
    NodeMissing { node: String },

    /// A patch targeted an input field the node does not carry.
    #[error("Node {node} has no input field '{field}'")]
    FieldMissing { node: String, field: String },
}
