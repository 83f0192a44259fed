use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::prompt::{WorkflowNode, WorkflowPrompt};
use super::value::InputValue;
use crate::error::EaselError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern"));
static FULL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{\{(\w+)\}\}$").expect("full token pattern"));

/// Declared type of a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Int => write!(f, "int"),
            ParamType::Float => write!(f, "float"),
            ParamType::Bool => write!(f, "bool"),
        }
    }
}

/// Errors raised while instantiating a template. These are purely local:
/// instantiation never touches the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("missing required parameter(s): {}", names.join(", "))]
    MissingParameter { names: Vec<String> },

    #[error("parameter '{name}' expects {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        got: String,
    },

    #[error("placeholder '{{{{{name}}}}}' does not name a declared parameter")]
    UnknownParameter { name: String },
}

/// One customizable value of a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A reusable workflow definition whose node inputs may carry `{{name}}`
/// placeholders.
///
/// Templates are immutable once loaded; every [`instantiate`] call produces
/// a fresh, independent [`WorkflowPrompt`], so one template can serve any
/// number of concurrent instantiations.
///
/// [`instantiate`]: WorkflowTemplate::instantiate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub parameters: BTreeMap<String, TemplateParameter>,
    pub nodes: BTreeMap<String, WorkflowNode>,
}

impl WorkflowTemplate {
    /// Load a template from its JSON file form (§6 contract: `name`,
    /// `description`, `category`, `parameters`, `nodes`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EaselError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), EaselError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Resolve parameters and substitute placeholders, producing a concrete
    /// workflow prompt.
    ///
    /// A string input that is exactly one `{{name}}` token takes the
    /// resolved value with its native type; a placeholder embedded in
    /// surrounding text interpolates the value's string form. Placeholders
    /// naming undeclared parameters fail fast. Pure and synchronous; the
    /// template itself is never mutated.
    pub fn instantiate(
        &self,
        provided: &HashMap<String, Value>,
    ) -> Result<WorkflowPrompt, TemplateError> {
        let resolved = self.resolve_parameters(provided)?;

        let mut nodes = BTreeMap::new();
        for (node_id, node) in &self.nodes {
            let mut inputs = BTreeMap::new();
            for (input_name, value) in &node.inputs {
                inputs.insert(input_name.clone(), self.substitute(value, &resolved)?);
            }
            nodes.insert(
                node_id.clone(),
                WorkflowNode {
                    class_type: node.class_type.clone(),
                    inputs,
                },
            );
        }

        Ok(WorkflowPrompt::new(nodes))
    }

    /// Merge provided values over declared defaults, type-checking as we go.
    /// Every missing required parameter is collected so the error names all
    /// of them at once. Provided values not declared on the template are
    /// ignored.
    fn resolve_parameters(
        &self,
        provided: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, TemplateError> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();

        for (name, param) in &self.parameters {
            let supplied = provided.get(name).filter(|v| !is_absent(v, param));
            match supplied {
                Some(value) => {
                    resolved.insert(name.clone(), coerce(name, param.param_type, value)?);
                }
                None => match &param.default {
                    Some(default) if !default.is_null() => {
                        resolved.insert(name.clone(), default.clone());
                    }
                    _ if param.required => missing.push(name.clone()),
                    // Optional with no default: stays unresolved. A
                    // placeholder naming it is reported during substitution.
                    _ => {}
                },
            }
        }

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(TemplateError::MissingParameter { names: missing })
        }
    }

    fn substitute(
        &self,
        value: &InputValue,
        resolved: &HashMap<String, Value>,
    ) -> Result<InputValue, TemplateError> {
        match value {
            InputValue::Text(s) => self.substitute_text(s, resolved),
            InputValue::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.substitute(item, resolved))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(InputValue::List(items))
            }
            InputValue::Map(entries) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.substitute(v, resolved)?)))
                    .collect::<Result<BTreeMap<_, _>, TemplateError>>()?;
                Ok(InputValue::Map(entries))
            }
            // Numbers, booleans and reference tuples copy unchanged.
            other => Ok(other.clone()),
        }
    }

    fn substitute_text(
        &self,
        text: &str,
        resolved: &HashMap<String, Value>,
    ) -> Result<InputValue, TemplateError> {
        // Whole-string token: replace with the native typed value.
        if let Some(caps) = FULL_TOKEN.captures(text) {
            let value = self.lookup(resolved, &caps[1])?;
            return Ok(typed(value));
        }

        if !PLACEHOLDER.is_match(text) {
            return Ok(InputValue::Text(text.to_string()));
        }

        // Embedded placeholders: textual interpolation, result stays a string.
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(text) {
            let token = caps.get(0).expect("match group 0");
            let value = self.lookup(resolved, &caps[1])?;
            out.push_str(&text[last..token.start()]);
            out.push_str(&text_form(value));
            last = token.end();
        }
        out.push_str(&text[last..]);
        Ok(InputValue::Text(out))
    }

    fn lookup<'a>(
        &self,
        resolved: &'a HashMap<String, Value>,
        name: &str,
    ) -> Result<&'a Value, TemplateError> {
        if let Some(value) = resolved.get(name) {
            return Ok(value);
        }
        if self.parameters.contains_key(name) {
            // Declared but unresolvable (optional, no default, not provided).
            Err(TemplateError::MissingParameter {
                names: vec![name.to_string()],
            })
        } else {
            Err(TemplateError::UnknownParameter {
                name: name.to_string(),
            })
        }
    }
}

/// `null` never counts as a value; an empty string does not satisfy a
/// required string parameter.
fn is_absent(value: &Value, param: &TemplateParameter) -> bool {
    if value.is_null() {
        return true;
    }
    param.required
        && param.param_type == ParamType::String
        && value.as_str().is_some_and(str::is_empty)
}

/// Type-check a provided value against the declared type, applying the
/// lenient coercions the template format allows: int→string,
/// numeric-string→int/float, int→float.
fn coerce(name: &str, expected: ParamType, value: &Value) -> Result<Value, TemplateError> {
    let mismatch = || TemplateError::TypeMismatch {
        name: name.to_string(),
        expected,
        got: json_type_name(value).to_string(),
    };

    match expected {
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        ParamType::Int => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| Value::from(i))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Float => match value {
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
    }
}

/// Resolved value → node input, preserving the native type.
fn typed(value: &Value) -> InputValue {
    serde_json::from_value(value.clone()).unwrap_or_else(|_| InputValue::Text(value.to_string()))
}

/// Resolved value → interpolation text. Strings interpolate bare, without
/// JSON quoting.
fn text_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::value::NodeRef;
    use serde_json::json;

    fn param(name: &str, param_type: ParamType, default: Option<Value>, required: bool) -> TemplateParameter {
        TemplateParameter {
            name: name.to_string(),
            description: format!("{name} parameter"),
            param_type,
            default,
            required,
        }
    }

    fn template(
        params: Vec<TemplateParameter>,
        nodes: Vec<(&str, WorkflowNode)>,
    ) -> WorkflowTemplate {
        WorkflowTemplate {
            name: "Test Template".into(),
            description: "for tests".into(),
            category: None,
            parameters: params.into_iter().map(|p| (p.name.clone(), p)).collect(),
            nodes: nodes
                .into_iter()
                .map(|(id, node)| (id.to_string(), node))
                .collect(),
        }
    }

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn default_is_used_when_parameter_omitted() {
        let t = template(
            vec![param("steps", ParamType::Int, Some(json!(20)), true)],
            vec![("1", WorkflowNode::new("Sample").with_input("steps", "{{steps}}"))],
        );

        let prompt = t.instantiate(&HashMap::new()).unwrap();
        assert_eq!(prompt.node("1").unwrap().inputs["steps"], InputValue::Int(20));
    }

    #[test]
    fn full_token_preserves_native_type() {
        let t = template(
            vec![param("seed", ParamType::Int, None, true)],
            vec![("1", WorkflowNode::new("KSampler").with_input("seed", "{{seed}}"))],
        );

        let prompt = t.instantiate(&params(&[("seed", json!(42))])).unwrap();
        assert_eq!(prompt.node("1").unwrap().inputs["seed"], InputValue::Int(42));
    }

    #[test]
    fn embedded_placeholder_interpolates_as_text() {
        let t = template(
            vec![param("seed", ParamType::Int, None, true)],
            vec![(
                "1",
                WorkflowNode::new("SaveImage").with_input("filename_prefix", "seed_{{seed}}"),
            )],
        );

        let prompt = t.instantiate(&params(&[("seed", json!(42))])).unwrap();
        assert_eq!(
            prompt.node("1").unwrap().inputs["filename_prefix"],
            InputValue::Text("seed_42".into())
        );
    }

    #[test]
    fn multiple_placeholders_in_one_string() {
        let t = template(
            vec![
                param("subject", ParamType::String, None, true),
                param("style", ParamType::String, None, true),
            ],
            vec![(
                "1",
                WorkflowNode::new("CLIPTextEncode").with_input("text", "{{subject}}, {{style}}"),
            )],
        );

        let prompt = t
            .instantiate(&params(&[
                ("subject", json!("warrior")),
                ("style", json!("anime style")),
            ]))
            .unwrap();
        assert_eq!(
            prompt.node("1").unwrap().inputs["text"],
            InputValue::Text("warrior, anime style".into())
        );
    }

    #[test]
    fn float_full_token() {
        let t = template(
            vec![param("cfg", ParamType::Float, None, true)],
            vec![("1", WorkflowNode::new("KSampler").with_input("cfg", "{{cfg}}"))],
        );

        let prompt = t.instantiate(&params(&[("cfg", json!(8.5))])).unwrap();
        assert_eq!(prompt.node("1").unwrap().inputs["cfg"], InputValue::Float(8.5));
    }

    #[test]
    fn missing_required_lists_every_name() {
        let t = template(
            vec![
                param("prompt", ParamType::String, None, true),
                param("negative", ParamType::String, None, true),
            ],
            vec![("1", WorkflowNode::new("CLIPTextEncode").with_input("text", "{{prompt}}"))],
        );

        let err = t.instantiate(&HashMap::new()).unwrap_err();
        let TemplateError::MissingParameter { names } = &err else {
            panic!("expected MissingParameter, got {err:?}");
        };
        assert_eq!(names, &vec!["negative".to_string(), "prompt".to_string()]);
        let message = err.to_string();
        assert!(message.contains("prompt") && message.contains("negative"));
    }

    #[test]
    fn null_and_empty_string_count_as_absent() {
        let t = template(
            vec![param("prompt", ParamType::String, None, true)],
            vec![("1", WorkflowNode::new("CLIPTextEncode").with_input("text", "{{prompt}}"))],
        );

        assert!(matches!(
            t.instantiate(&params(&[("prompt", Value::Null)])),
            Err(TemplateError::MissingParameter { .. })
        ));
        assert!(matches!(
            t.instantiate(&params(&[("prompt", json!(""))])),
            Err(TemplateError::MissingParameter { .. })
        ));
    }

    #[test]
    fn lenient_coercions() {
        let t = template(
            vec![
                param("text", ParamType::String, None, true),
                param("seed", ParamType::Int, None, true),
                param("cfg", ParamType::Float, None, true),
            ],
            vec![(
                "1",
                WorkflowNode::new("KSampler")
                    .with_input("text", "{{text}}")
                    .with_input("seed", "{{seed}}")
                    .with_input("cfg", "{{cfg}}"),
            )],
        );

        // int→string, numeric-string→int, int→float.
        let prompt = t
            .instantiate(&params(&[
                ("text", json!(123)),
                ("seed", json!("12345")),
                ("cfg", json!(8)),
            ]))
            .unwrap();
        let inputs = &prompt.node("1").unwrap().inputs;
        assert_eq!(inputs["text"], InputValue::Text("123".into()));
        assert_eq!(inputs["seed"], InputValue::Int(12345));
        assert_eq!(inputs["cfg"], InputValue::Float(8.0));
    }

    #[test]
    fn type_mismatch_names_parameter_and_expected_type() {
        let t = template(
            vec![param("seed", ParamType::Int, None, true)],
            vec![("1", WorkflowNode::new("KSampler").with_input("seed", "{{seed}}"))],
        );

        let err = t
            .instantiate(&params(&[("seed", json!("not a number"))]))
            .unwrap_err();
        let TemplateError::TypeMismatch { name, expected, .. } = &err else {
            panic!("expected TypeMismatch, got {err:?}");
        };
        assert_eq!(name, "seed");
        assert_eq!(*expected, ParamType::Int);

        let err = t.instantiate(&params(&[("seed", json!(["a"]))])).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn undeclared_placeholder_fails_fast() {
        let t = template(
            vec![],
            vec![("1", WorkflowNode::new("CLIPTextEncode").with_input("text", "{{undefined}}"))],
        );

        let err = t.instantiate(&HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnknownParameter {
                name: "undefined".into()
            }
        );
    }

    #[test]
    fn extra_provided_parameters_are_ignored() {
        let t = template(
            vec![],
            vec![("1", WorkflowNode::new("Any").with_input("value", "static"))],
        );

        let prompt = t.instantiate(&params(&[("unused", json!("x"))])).unwrap();
        assert_eq!(
            prompt.node("1").unwrap().inputs["value"],
            InputValue::Text("static".into())
        );
    }

    #[test]
    fn nested_collections_are_substituted() {
        let nested: InputValue = serde_json::from_value(json!({
            "inner": {"value": "{{name}}"},
            "items": ["{{name}}", "literal", 7]
        }))
        .unwrap();
        let t = template(
            vec![param("name", ParamType::String, None, true)],
            vec![("1", WorkflowNode::new("Custom").with_input("nested", nested))],
        );

        let prompt = t.instantiate(&params(&[("name", json!("dynamic"))])).unwrap();
        let InputValue::Map(map) = &prompt.node("1").unwrap().inputs["nested"] else {
            panic!("expected map input");
        };
        let InputValue::Map(inner) = &map["inner"] else {
            panic!("expected inner map");
        };
        assert_eq!(inner["value"], InputValue::Text("dynamic".into()));
        let InputValue::List(items) = &map["items"] else {
            panic!("expected list");
        };
        assert_eq!(items[0], InputValue::Text("dynamic".into()));
        assert_eq!(items[2], InputValue::Int(7));
    }

    #[test]
    fn references_copy_unchanged() {
        let t = template(
            vec![param("seed", ParamType::Int, Some(json!(1)), false)],
            vec![(
                "2",
                WorkflowNode::new("KSampler")
                    .with_input("model", NodeRef::new("1", 0))
                    .with_input("seed", "{{seed}}"),
            )],
        );

        let prompt = t.instantiate(&HashMap::new()).unwrap();
        assert_eq!(
            prompt.node("2").unwrap().inputs["model"],
            InputValue::Reference(NodeRef::new("1", 0))
        );
    }

    #[test]
    fn instantiate_is_pure_and_idempotent() {
        let t = template(
            vec![param("steps", ParamType::Int, Some(json!(20)), true)],
            vec![("1", WorkflowNode::new("Sample").with_input("steps", "{{steps}}"))],
        );
        let before = t.clone();
        let supplied = params(&[("steps", json!(30))]);

        let first = t.instantiate(&supplied).unwrap();
        let second = t.instantiate(&supplied).unwrap();

        assert_eq!(first, second);
        assert_eq!(t, before);
        // The template still carries its placeholder.
        assert_eq!(
            t.nodes["1"].inputs["steps"],
            InputValue::Text("{{steps}}".into())
        );
    }

    #[test]
    fn complete_parameter_set_leaves_no_residual_tokens() {
        let t = template(
            vec![
                param("prompt", ParamType::String, None, true),
                param("seed", ParamType::Int, None, true),
            ],
            vec![
                ("1", WorkflowNode::new("CLIPTextEncode").with_input("text", "{{prompt}}")),
                (
                    "2",
                    WorkflowNode::new("SaveImage").with_input("filename_prefix", "gen_{{seed}}"),
                ),
            ],
        );

        let prompt = t
            .instantiate(&params(&[("prompt", json!("a castle")), ("seed", json!(9))]))
            .unwrap();
        let rendered = serde_json::to_string(&prompt).unwrap();
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn file_format_parses_with_defaults() {
        let raw = json!({
            "name": "Character Portrait",
            "description": "portrait generator",
            "category": "character",
            "parameters": {
                "prompt": {
                    "name": "prompt",
                    "description": "text prompt",
                    "type": "string",
                    "default": "a landscape"
                }
            },
            "nodes": {
                "1": {"class_type": "CLIPTextEncode", "inputs": {"text": "{{prompt}}"}}
            }
        });

        let t: WorkflowTemplate = serde_json::from_value(raw).unwrap();
        assert_eq!(t.category.as_deref(), Some("character"));
        // `required` defaults to true when the file omits it.
        assert!(t.parameters["prompt"].required);
        assert_eq!(t.parameters["prompt"].param_type, ParamType::String);
    }
}
