use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A connection to another node's output: `["node_id", output_slot]` on the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef(pub String, pub u32);

impl NodeRef {
    pub fn new(node_id: impl Into<String>, slot: u32) -> Self {
        Self(node_id.into(), slot)
    }

    pub fn node_id(&self) -> &str {
        &self.0
    }

    pub fn slot(&self) -> u32 {
        self.1
    }
}

/// A single node input: a literal, a reference to another node's output, or
/// a nested collection of inputs.
///
/// The wire encoding is untagged JSON. A two-element array whose first
/// element is a string and second an integer is always a [`NodeRef`];
/// anything else array-shaped is a plain list. Variant order matters for
/// deserialization: scalars first, then the reference shape, then the
/// collections it would otherwise shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Reference(NodeRef),
    List(Vec<InputValue>),
    Map(BTreeMap<String, InputValue>),
}

impl InputValue {
    /// True for the scalar literal variants (not references or collections).
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            InputValue::Bool(_) | InputValue::Int(_) | InputValue::Float(_) | InputValue::Text(_)
        )
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            InputValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            InputValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for InputValue {
    fn from(s: &str) -> Self {
        InputValue::Text(s.to_string())
    }
}

impl From<i64> for InputValue {
    fn from(n: i64) -> Self {
        InputValue::Int(n)
    }
}

impl From<f64> for InputValue {
    fn from(n: f64) -> Self {
        InputValue::Float(n)
    }
}

impl From<bool> for InputValue {
    fn from(b: bool) -> Self {
        InputValue::Bool(b)
    }
}

impl From<NodeRef> for InputValue {
    fn from(r: NodeRef) -> Self {
        InputValue::Reference(r)
    }
}
