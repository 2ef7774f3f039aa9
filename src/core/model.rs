//! AN-003: Resource nodes and stacks, pure data built before any provisioning.

use super::error::GraphError;
use super::types::{ConfigValue, Outputs, ResourceKind};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::fmt;

/// Lifecycle of a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unresolved,
    Resolving,
    Resolved,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::Resolving => write!(f, "resolving"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One declared infrastructure unit.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    id: String,
    stack: String,
    pub kind: ResourceKind,
    pub config: IndexMap<String, ConfigValue>,
    /// Explicit dependencies (local id or `stack/id`)
    pub depends_on: Vec<String>,
    state: NodeState,
    outputs: Option<Outputs>,
}

impl ResourceNode {
    fn new(
        stack: &str,
        id: &str,
        kind: ResourceKind,
        config: IndexMap<String, ConfigValue>,
    ) -> Self {
        Self {
            id: id.to_string(),
            stack: stack.to_string(),
            kind,
            config,
            depends_on: Vec::new(),
            state: NodeState::Unresolved,
            outputs: None,
        }
    }

    /// Id unique within the owning stack.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Graph-wide id: `stack/id`.
    pub fn qualified_id(&self) -> String {
        qualify(&self.stack, &self.id)
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_resolved(&self) -> bool {
        self.state == NodeState::Resolved
    }

    /// Outputs, present only once the node is resolved.
    pub fn outputs(&self) -> Option<&Outputs> {
        self.outputs.as_ref()
    }

    /// Add an explicit dependency.
    pub fn depends_on(&mut self, target: impl Into<String>) -> &mut Self {
        self.depends_on.push(target.into());
        self
    }

    /// Set a configuration entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> &mut Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub(crate) fn mark_resolving(&mut self) {
        self.state = NodeState::Resolving;
    }

    /// Record outputs. A node is resolved at most once.
    pub(crate) fn resolve(&mut self, outputs: Outputs) -> Result<(), GraphError> {
        if self.state == NodeState::Resolved || self.outputs.is_some() {
            return Err(GraphError::AlreadyResolved(self.qualified_id()));
        }
        self.outputs = Some(outputs);
        self.state = NodeState::Resolved;
        Ok(())
    }

    pub(crate) fn fail(&mut self) {
        self.state = NodeState::Failed;
    }

    /// Return to `unresolved`, dropping outputs (explicit retry or teardown).
    pub(crate) fn reset(&mut self) {
        self.state = NodeState::Unresolved;
        self.outputs = None;
    }
}

/// Join a stack name and a local id.
pub fn qualify(stack: &str, id: &str) -> String {
    format!("{}/{}", stack, id)
}

/// Expand a node path relative to `stack`: `id` → `stack/id`, `s/id` unchanged.
pub fn qualify_path(stack: &str, path: &str) -> String {
    if path.contains('/') {
        path.to_string()
    } else {
        qualify(stack, path)
    }
}

/// A named, ordered collection of resource nodes with exports.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    pub description: Option<String>,
    pub inputs: Vec<String>,
    nodes: Vec<ResourceNode>,
    ids: FxHashSet<String>,
    pub exports: IndexMap<String, ConfigValue>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            inputs: Vec::new(),
            nodes: Vec::new(),
            ids: FxHashSet::default(),
            exports: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare another stack whose resources must exist first.
    pub fn with_input(mut self, stack: impl Into<String>) -> Self {
        self.inputs.push(stack.into());
        self
    }

    /// Define a node. Ids are unique within a stack.
    pub fn define_node(
        &mut self,
        id: &str,
        kind: ResourceKind,
        config: IndexMap<String, ConfigValue>,
    ) -> Result<&mut ResourceNode, GraphError> {
        if !self.ids.insert(id.to_string()) {
            return Err(GraphError::DuplicateId {
                stack: self.name.clone(),
                id: id.to_string(),
            });
        }
        self.nodes
            .push(ResourceNode::new(&self.name, id, kind, config));
        let last = self.nodes.len() - 1;
        Ok(&mut self.nodes[last])
    }

    /// Export a value (literal or reference) from this stack.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<ConfigValue>) {
        self.exports.insert(name.into(), value.into());
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub(crate) fn into_parts(self) -> (String, Vec<String>, Vec<ResourceNode>, IndexMap<String, ConfigValue>) {
        (self.name, self.inputs, self.nodes, self.exports)
    }
}

/// Build a config map from key/value pairs.
pub fn config<K, V, I>(entries: I) -> IndexMap<String, ConfigValue>
where
    K: Into<String>,
    V: Into<ConfigValue>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
