//! AN-004: Template and reference resolution.
//!
//! Two template namespaces exist inside strings:
//! - `{{params.key}}`: substituted once at load time from project params
//! - `{{ref.<node>.<attr>}}`: an implicit reference, substituted when the
//!   target node has resolved
//!
//! Structured `{ref, attr}` values are substituted with the typed output value;
//! string templates splice in its textual rendering.

use super::error::GraphError;
use super::graph::DependencyGraph;
use super::model::{qualify_path, ResourceNode};
use super::types::*;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static REF_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*ref\.([^{}]*?)\s*\}\}").expect("reference template pattern compiles")
});

/// Parse the body of a `{{ref.…}}` template: `<node path>.<attr>`.
fn parse_ref_body(body: &str) -> Option<Reference> {
    if body.chars().any(char::is_whitespace) {
        return None;
    }
    let (node, attr) = body.rsplit_once('.')?;
    if node.is_empty() || attr.is_empty() {
        return None;
    }
    Some(Reference::new(node, attr))
}

/// Collect every reference in a configuration tree, structured or templated.
/// Returns the raw template text of the first malformed reference as `Err`.
pub fn collect_references(
    config: &IndexMap<String, ConfigValue>,
) -> Result<Vec<Reference>, String> {
    let mut refs = Vec::new();
    for value in config.values() {
        collect_value_references(value, &mut refs)?;
    }
    Ok(refs)
}

fn collect_value_references(value: &ConfigValue, refs: &mut Vec<Reference>) -> Result<(), String> {
    match value {
        ConfigValue::Ref(r) => refs.push(r.clone()),
        ConfigValue::String(s) => {
            for caps in REF_TEMPLATE.captures_iter(s) {
                let reference = parse_ref_body(&caps[1]).ok_or_else(|| caps[0].to_string())?;
                refs.push(reference);
            }
        }
        ConfigValue::List(items) => {
            for item in items {
                collect_value_references(item, refs)?;
            }
        }
        ConfigValue::Map(map) => {
            for item in map.values() {
                collect_value_references(item, refs)?;
            }
        }
        ConfigValue::Bool(_) | ConfigValue::Int(_) | ConfigValue::Float(_) | ConfigValue::Null => {}
    }
    Ok(())
}

/// Resolve a node's configuration against the graph's current outputs.
pub fn resolve(node: &ResourceNode, graph: &DependencyGraph) -> Result<ResolvedConfig, GraphError> {
    let owner = node.qualified_id();
    let mut resolved = ResolvedConfig::new();
    for (key, value) in &node.config {
        let v = resolve_value(value, node.stack(), &owner, graph)?;
        resolved.insert(key.clone(), v);
    }
    Ok(resolved)
}

/// Resolve a single value. `stack` anchors relative node paths; `owner` names
/// the consumer in error messages.
pub fn resolve_value(
    value: &ConfigValue,
    stack: &str,
    owner: &str,
    graph: &DependencyGraph,
) -> Result<serde_json::Value, GraphError> {
    match value {
        ConfigValue::Ref(r) => lookup(r, stack, owner, graph).cloned(),
        ConfigValue::String(s) => Ok(serde_json::Value::String(interpolate(s, stack, owner, graph)?)),
        ConfigValue::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        ConfigValue::Int(n) => Ok(serde_json::Value::from(*n)),
        ConfigValue::Float(n) => Ok(serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        ConfigValue::Null => Ok(serde_json::Value::Null),
        ConfigValue::List(items) => items
            .iter()
            .map(|item| resolve_value(item, stack, owner, graph))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        ConfigValue::Map(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, stack, owner, graph)?);
            }
            Ok(serde_json::Value::Object(out))
        }
    }
}

fn lookup<'g>(
    reference: &Reference,
    stack: &str,
    owner: &str,
    graph: &'g DependencyGraph,
) -> Result<&'g serde_json::Value, GraphError> {
    let target_id = qualify_path(stack, &reference.node);
    let target = graph
        .get(&target_id)
        .ok_or_else(|| GraphError::UnknownReference {
            node: owner.to_string(),
            target: target_id.clone(),
        })?;
    let outputs = match target.outputs() {
        Some(outputs) if target.is_resolved() => outputs,
        _ => {
            return Err(GraphError::AttributeNotReady {
                node: owner.to_string(),
                target: target_id,
                attr: reference.attr.clone(),
            })
        }
    };
    outputs
        .get(&reference.attr)
        .ok_or_else(|| GraphError::MissingAttribute {
            node: owner.to_string(),
            target: target_id,
            attr: reference.attr.clone(),
        })
}

fn interpolate(
    template: &str,
    stack: &str,
    owner: &str,
    graph: &DependencyGraph,
) -> Result<String, GraphError> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for caps in REF_TEMPLATE.captures_iter(template) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let reference = parse_ref_body(&caps[1]).ok_or_else(|| GraphError::InvalidReference {
            node: owner.to_string(),
            reference: caps[0].to_string(),
        })?;
        result.push_str(&template[last..whole.start]);
        result.push_str(&json_value_to_string(lookup(&reference, stack, owner, graph)?));
        last = whole.end;
    }
    result.push_str(&template[last..]);
    Ok(result)
}

/// Substitute `{{params.key}}` templates in a string, leaving `{{ref.…}}` intact.
pub fn resolve_param_template(
    template: &str,
    params: &HashMap<String, ConfigValue>,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        if key.starts_with("ref.") {
            start = close;
            continue;
        }
        let param_key = key
            .strip_prefix("params.")
            .ok_or_else(|| format!("unknown template variable: {}", key))?;
        let value = params
            .get(param_key)
            .ok_or_else(|| format!("unknown param: {}", param_key))
            .and_then(param_to_string)?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

fn param_to_string(value: &ConfigValue) -> Result<String, String> {
    match value {
        ConfigValue::String(s) => Ok(s.clone()),
        ConfigValue::Int(n) => Ok(n.to_string()),
        ConfigValue::Float(n) => Ok(n.to_string()),
        ConfigValue::Bool(b) => Ok(b.to_string()),
        ConfigValue::Null => Ok(String::new()),
        other => Err(format!("param cannot be spliced into a string: {:?}", other)),
    }
}

/// Substitute params throughout a value tree. A string that is exactly one
/// `{{params.key}}` template takes the param's own (typed) value.
pub fn resolve_param_value(
    value: &ConfigValue,
    params: &HashMap<String, ConfigValue>,
) -> Result<ConfigValue, String> {
    match value {
        ConfigValue::String(s) => {
            if let Some(key) = whole_param_template(s) {
                return params
                    .get(key)
                    .cloned()
                    .ok_or_else(|| format!("unknown param: {}", key));
            }
            resolve_param_template(s, params).map(ConfigValue::String)
        }
        ConfigValue::List(items) => items
            .iter()
            .map(|item| resolve_param_value(item, params))
            .collect::<Result<Vec<_>, _>>()
            .map(ConfigValue::List),
        ConfigValue::Map(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_param_value(v, params)?);
            }
            Ok(ConfigValue::Map(out))
        }
        other => Ok(other.clone()),
    }
}

fn whole_param_template(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    inner.trim().strip_prefix("params.")
}
