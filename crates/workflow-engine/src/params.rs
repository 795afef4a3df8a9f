//! Parameter-declaration resolution
//!
//! Every node declares ordered input/output parameters. A declaration is a
//! typed schema whose value may be bound to a literal, to an upstream
//! reference (`blockID` + path into that node's output), or left to its
//! declared default. This module materializes declarations into plain JSON
//! objects against the current variable map.
//!
//! Resolution priority per field: caller-supplied real data, then the bound
//! value, then the declared default, then a type-based default.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Variable;
use crate::definitions::JsonMap;
use crate::error::Result;

/// Where a bound reference points: an upstream node's output subtree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefContent {
    #[serde(rename = "blockID")]
    pub block_id: String,
    pub path: String,
    /// Marker used by loop declarations ("loop-block-output")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Optional binding of a declaration to a concrete value source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum ParameterValue {
    Literal(Value),
    Ref(RefContent),
}

/// A single typed parameter declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSchema {
    pub name: String,
    /// "string" | "integer" | "number" | "boolean" | "object" | "array"
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ParameterValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<ParameterSchema>,
    /// Item blueprint for array declarations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
}

impl ParameterSchema {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            ..Self::default()
        }
    }

    pub fn literal(name: impl Into<String>, param_type: impl Into<String>, value: Value) -> Self {
        Self {
            value: Some(ParameterValue::Literal(value)),
            ..Self::new(name, param_type)
        }
    }

    pub fn reference(
        name: impl Into<String>,
        param_type: impl Into<String>,
        block_id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            value: Some(ParameterValue::Ref(RefContent {
                block_id: block_id.into(),
                path: path.into(),
                source: None,
            })),
            ..Self::new(name, param_type)
        }
    }
}

/// Materialize a declaration list into a plain JSON object.
///
/// `real_data` takes priority over bound values; it is how the Start node
/// maps the run payload onto its declared outputs. A ref whose source
/// variable is a live stream awaits the stream's final result first.
pub async fn resolve_schemas(
    schemas: &[ParameterSchema],
    variables: &HashMap<String, Variable>,
    real_data: Option<&JsonMap>,
) -> Result<JsonMap> {
    let mut result = JsonMap::new();
    for schema in schemas {
        if schema.name.is_empty() {
            continue;
        }
        let item_real = real_data.and_then(|d| d.get(&schema.name));
        let value = process_schema_node(schema, variables, item_real).await?;
        result.insert(schema.name.clone(), value);
    }
    Ok(result)
}

/// Resolve one declaration to its value, ignoring its name
pub async fn resolve_single(
    schema: &ParameterSchema,
    variables: &HashMap<String, Variable>,
) -> Result<Value> {
    process_schema_node(schema, variables, None).await
}

fn process_schema_node<'a>(
    schema: &'a ParameterSchema,
    variables: &'a HashMap<String, Variable>,
    real_data: Option<&'a Value>,
) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        let mut resolved: Option<Value> = match real_data {
            Some(v) => Some(v.clone()),
            None => match &schema.value {
                Some(ParameterValue::Literal(v)) => Some(v.clone()),
                Some(ParameterValue::Ref(r)) => resolve_ref(r, variables).await?,
                None => None,
            },
        };
        if resolved.is_none() {
            resolved = schema.default.clone();
        }

        match schema.param_type.as_str() {
            "object" => {
                let source = match resolved {
                    Some(Value::Object(map)) => map,
                    _ => JsonMap::new(),
                };
                if schema.properties.is_empty() {
                    return Ok(Value::Object(source));
                }
                let shaped = resolve_schemas(&schema.properties, variables, Some(&source)).await?;
                Ok(Value::Object(shaped))
            }
            "array" => {
                let source = match resolved {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                let Some(blueprint) = schema.items.as_deref() else {
                    return Ok(Value::Array(source));
                };
                if source.is_empty() {
                    let default_item = process_schema_node(blueprint, variables, None).await?;
                    return Ok(Value::Array(vec![default_item]));
                }
                let mut shaped = Vec::with_capacity(source.len());
                for item in &source {
                    shaped.push(process_schema_node(blueprint, variables, Some(item)).await?);
                }
                Ok(Value::Array(shaped))
            }
            _ => Ok(resolved.unwrap_or_else(|| default_for_type(&schema.param_type))),
        }
    })
}

async fn resolve_ref(
    r: &RefContent,
    variables: &HashMap<String, Variable>,
) -> Result<Option<Value>> {
    if r.block_id.is_empty() {
        return Ok(None);
    }
    let source = match variables.get(&r.block_id) {
        Some(Variable::Value(v)) => v.clone(),
        Some(Variable::Stream(broadcaster)) => Value::Object(broadcaster.result().await?),
        None => return Ok(None),
    };
    if r.path.is_empty() {
        return Ok(Some(source));
    }
    Ok(value_by_path(&source, &r.path))
}

fn default_for_type(param_type: &str) -> Value {
    match param_type {
        "string" => Value::String(String::new()),
        "integer" | "number" => Value::from(0),
        "boolean" => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Walk a dotted path with optional array indices, e.g. `"a.b[0].c"`.
/// Returns `None` when any segment is missing or mistyped.
pub fn value_by_path(data: &Value, path: &str) -> Option<Value> {
    let mut current = data.clone();
    for token in parse_path(path) {
        current = match token {
            PathToken::Key(key) => current.get(key.as_str())?.clone(),
            PathToken::Index(i) => current.get(i)?.clone(),
        };
    }
    Some(current)
}

enum PathToken {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<PathToken> {
    let mut tokens = Vec::new();
    let mut chars = path.chars().peekable();
    let mut key = String::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    tokens.push(PathToken::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    tokens.push(PathToken::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                    digits.push(d);
                }
                if let Ok(i) = digits.parse::<usize>() {
                    tokens.push(PathToken::Index(i));
                }
            }
            _ => key.push(c),
        }
    }
    if !key.is_empty() {
        tokens.push(PathToken::Key(key));
    }
    tokens
}

/// One piece of a `{{…}}` template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    Text(String),
    /// Variable path between the braces, trimmed
    Var(String),
}

/// Split a template into literal text and `{{path}}` segments
pub fn split_template(template: &str) -> Vec<TemplateSegment> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        if let Some(close) = rest[open..].find("}}") {
            if open > 0 {
                segments.push(TemplateSegment::Text(rest[..open].to_string()));
            }
            let var = rest[open + 2..open + close].trim().to_string();
            segments.push(TemplateSegment::Var(var));
            rest = &rest[open + close + 2..];
        } else {
            break;
        }
    }
    if !rest.is_empty() {
        segments.push(TemplateSegment::Text(rest.to_string()));
    }
    segments
}

/// Render a `{{path}}` template against resolved data. Unresolvable
/// placeholders are kept verbatim.
pub fn render_template(template: &str, data: &JsonMap) -> String {
    let root = Value::Object(data.clone());
    let mut out = String::new();
    for segment in split_template(template) {
        match segment {
            TemplateSegment::Text(text) => out.push_str(&text),
            TemplateSegment::Var(path) => match value_by_path(&root, &path) {
                Some(value) => out.push_str(&value_to_text(&value)),
                None => {
                    out.push_str("{{");
                    out.push_str(&path);
                    out.push_str("}}");
                }
            },
        }
    }
    out
}

/// Text form of a value for template output: strings stay raw, everything
/// else renders as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Turn a list of per-iteration output objects into an object of lists:
/// `[{a:1},{a:2}] → {a:[1,2]}`. Key order follows first appearance.
pub fn transpose_outputs(iterations: &[JsonMap]) -> JsonMap {
    let mut merged = JsonMap::new();
    for iteration in iterations {
        for (key, value) in iteration {
            match merged.get_mut(key) {
                Some(Value::Array(list)) => list.push(value.clone()),
                _ => {
                    merged.insert(key.clone(), Value::Array(vec![value.clone()]));
                }
            }
        }
    }
    merged
}

/// Find the reference bound to a top-level variable name inside a node's
/// declaration list, searching nested properties and array item blueprints.
pub fn find_ref_in_schemas(schemas: &[ParameterSchema], target_name: &str) -> Option<RefContent> {
    for schema in schemas {
        if schema.name == target_name {
            if let Some(ParameterValue::Ref(r)) = &schema.value {
                return Some(r.clone());
            }
            return None;
        }
        if let Some(found) = find_ref_in_schemas(&schema.properties, target_name) {
            return Some(found);
        }
        if let Some(items) = &schema.items {
            if let Some(found) = find_ref_in_schemas(&items.properties, target_name) {
                return Some(found);
            }
        }
    }
    None
}
