use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::value::InputValue;

/// One processing step in a workflow: an operation type plus its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    pub inputs: BTreeMap<String, InputValue>,
}

impl WorkflowNode {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

/// A concrete, submittable workflow: node id → node, plus an optional
/// correlation id used to demultiplex push notifications.
///
/// References between nodes form a DAG; the client only checks structural
/// shape, connectivity is validated by the engine on submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPrompt {
    pub nodes: BTreeMap<String, WorkflowNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl WorkflowPrompt {
    pub fn new(nodes: BTreeMap<String, WorkflowNode>) -> Self {
        Self {
            nodes,
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    /// Body for the engine's submit endpoint:
    /// `{"prompt": {node_id: {class_type, inputs}}, "client_id": ...}`.
    pub fn to_api_format(&self) -> serde_json::Value {
        let mut body = json!({ "prompt": self.nodes });
        if let Some(client_id) = &self.client_id {
            body["client_id"] = json!(client_id);
        }
        body
    }

    /// Seed of the first sampler node carrying one, if any.
    pub fn seed(&self) -> Option<i64> {
        self.nodes
            .values()
            .filter(|node| node.class_type == "KSampler")
            .find_map(|node| node.inputs.get("seed").and_then(InputValue::as_int))
    }

    /// Overwrite the seed on every sampler node that has one.
    pub fn set_seed(&mut self, seed: i64) {
        for node in self.nodes.values_mut() {
            if node.class_type == "KSampler" && node.inputs.contains_key("seed") {
                node.inputs.insert("seed".into(), InputValue::Int(seed));
            }
        }
    }

    /// Content hash over the node graph, hex encoded. The correlation id is
    /// excluded so identical instantiations hash identically across runs.
    pub fn content_hash(&self) -> String {
        // BTreeMap keys serialize in a stable order, so the JSON is canonical.
        let canonical = serde_json::to_vec(&self.nodes).expect("node graph serializes");
        blake3::hash(&canonical).to_hex().to_string()
    }
}
