//! AN-006: YAML parsing, validation and stack construction.
//!
//! Parses andamio.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack and node identifiers are `[A-Za-z0-9_-]+`
//! - Stack inputs and depends_on targets must exist
//! - Templates use only the `params` and `ref` namespaces
//! - Required fields per resource kind

use super::graph::DependencyGraph;
use super::model::{qualify_path, Stack};
use super::resolver::resolve_param_value;
use super::types::*;
use indexmap::IndexMap;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier pattern compiles"));

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn err(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Parse an andamio.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<AndamioConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse an andamio.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<AndamioConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &AndamioConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        err(
            &mut errors,
            format!("version must be \"1.0\", got \"{}\"", config.version),
        );
    }
    if config.name.is_empty() {
        err(&mut errors, "name must not be empty".to_string());
    }
    if config.policy.max_concurrency == 0 {
        err(&mut errors, "policy.max_concurrency must be at least 1".to_string());
    }
    if let ProviderConfig::Script { command } = &config.provider {
        if command.trim().is_empty() {
            err(&mut errors, "provider.command must not be empty".to_string());
        }
    }

    for (stack_name, stack) in &config.stacks {
        if !IDENT.is_match(stack_name) {
            err(
                &mut errors,
                format!("stack name '{}' must match [A-Za-z0-9_-]+", stack_name),
            );
        }
        for input in &stack.inputs {
            if input == stack_name {
                err(&mut errors, format!("stack '{}' takes input from itself", stack_name));
            } else if !config.stacks.contains_key(input) {
                err(
                    &mut errors,
                    format!("stack '{}' takes input from unknown stack '{}'", stack_name, input),
                );
            }
        }

        for (id, node) in &stack.resources {
            let qualified = format!("{}/{}", stack_name, id);
            if !IDENT.is_match(id) {
                err(
                    &mut errors,
                    format!("node id '{}' must match [A-Za-z0-9_-]+", qualified),
                );
            }
            for dep in &node.depends_on {
                let target = qualify_path(stack_name, dep);
                if target == qualified {
                    err(&mut errors, format!("node '{}' depends on itself", qualified));
                } else if !node_exists(config, &target) {
                    err(
                        &mut errors,
                        format!("node '{}' depends on unknown node '{}'", qualified, dep),
                    );
                }
            }
            for (key, value) in &node.config {
                if let Err(e) = resolve_param_value(value, &config.params) {
                    err(&mut errors, format!("node '{}' config '{}': {}", qualified, key, e));
                }
            }
            validate_kind(&qualified, node, &mut errors);
        }

        for (name, value) in &stack.outputs {
            if let Err(e) = resolve_param_value(value, &config.params) {
                err(&mut errors, format!("stack '{}' output '{}': {}", stack_name, name, e));
            }
        }
    }

    errors
}

fn node_exists(config: &AndamioConfig, qualified: &str) -> bool {
    qualified
        .split_once('/')
        .and_then(|(stack, id)| config.stacks.get(stack).map(|s| s.resources.contains_key(id)))
        .unwrap_or(false)
}

fn validate_kind(id: &str, node: &NodeDecl, errors: &mut Vec<ValidationError>) {
    let has = |key: &str| node.config.contains_key(key);
    match node.kind {
        ResourceKind::DatabaseInstance => {
            if !has("engine") {
                err(errors, format!("node '{}' (database_instance) has no engine", id));
            }
        }
        ResourceKind::LoadBalancedService => {
            if !has("image") {
                err(errors, format!("node '{}' (load_balanced_service) has no image", id));
            }
            match node.config.get("container_port") {
                None => err(
                    errors,
                    format!("node '{}' (load_balanced_service) has no container_port", id),
                ),
                Some(ConfigValue::Int(_)) | Some(ConfigValue::Ref(_)) => {}
                Some(ConfigValue::String(s)) if s.contains("{{") => {}
                Some(_) => err(
                    errors,
                    format!("node '{}' (load_balanced_service) container_port must be an integer", id),
                ),
            }
        }
        ResourceKind::Secret => {
            if !has("secret_name") {
                err(errors, format!("node '{}' (secret) has no secret_name", id));
            }
        }
        ResourceKind::ScalingPolicy => {
            let min = node.config.get("min_capacity").and_then(ConfigValue::as_i64);
            let max = node.config.get("max_capacity").and_then(ConfigValue::as_i64);
            if let (Some(min), Some(max)) = (min, max) {
                if min > max {
                    err(
                        errors,
                        format!(
                            "node '{}' (scaling_policy) min_capacity {} exceeds max_capacity {}",
                            id, min, max
                        ),
                    );
                }
            }
        }
        ResourceKind::Dashboard => {
            if let Some(widgets) = node.config.get("widgets") {
                if !matches!(widgets, ConfigValue::List(_)) {
                    err(errors, format!("node '{}' (dashboard) widgets must be a list", id));
                }
            }
        }
        ResourceKind::Network | ResourceKind::Cluster | ResourceKind::SecurityGroup => {}
    }
}

/// Turn a validated config into stacks: params substituted, project tags merged.
pub fn build_stacks(config: &AndamioConfig) -> Result<Vec<Stack>, String> {
    let mut stacks = Vec::with_capacity(config.stacks.len());
    for (stack_name, decl) in &config.stacks {
        let mut stack = Stack::new(stack_name.as_str());
        stack.description = decl.description.clone();
        stack.inputs = decl.inputs.clone();

        for (id, node_decl) in &decl.resources {
            let mut node_config = IndexMap::new();
            for (key, value) in &node_decl.config {
                let value = resolve_param_value(value, &config.params)
                    .map_err(|e| format!("{}/{} config '{}': {}", stack_name, id, key, e))?;
                node_config.insert(key.clone(), value);
            }
            merge_tags(&mut node_config, &config.tags);

            let node = stack
                .define_node(id, node_decl.kind, node_config)
                .map_err(|e| e.to_string())?;
            for dep in &node_decl.depends_on {
                node.depends_on(dep.as_str());
            }
        }

        for (name, value) in &decl.outputs {
            let value = resolve_param_value(value, &config.params)
                .map_err(|e| format!("{} output '{}': {}", stack_name, name, e))?;
            stack.export(name.as_str(), value);
        }
        stacks.push(stack);
    }
    Ok(stacks)
}

/// Project tags go under `tags`; tags a node declares itself win.
fn merge_tags(node_config: &mut IndexMap<String, ConfigValue>, tags: &IndexMap<String, String>) {
    if tags.is_empty() {
        return;
    }
    let mut merged: IndexMap<String, ConfigValue> = tags
        .iter()
        .map(|(k, v)| (k.clone(), ConfigValue::from(v.as_str())))
        .collect();
    if let Some(ConfigValue::Map(own)) = node_config.get("tags") {
        for (k, v) in own {
            merged.insert(k.clone(), v.clone());
        }
    }
    node_config.insert("tags".to_string(), ConfigValue::Map(merged));
}

/// Parse, validate and build the dependency graph for a project file.
pub fn load_project(path: &Path) -> Result<(AndamioConfig, DependencyGraph), String> {
    let config = parse_config_file(path)?;
    let graph = graph_from_config(&config)?;
    Ok((config, graph))
}

/// Validate a parsed config and build its graph.
pub fn graph_from_config(config: &AndamioConfig) -> Result<DependencyGraph, String> {
    let errors = validate_config(config);
    if !errors.is_empty() {
        let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
        return Err(format!("validation failed:\n{}", lines.join("\n")));
    }
    let stacks = build_stacks(config)?;
    DependencyGraph::build(stacks).map_err(|e| e.to_string())
}
