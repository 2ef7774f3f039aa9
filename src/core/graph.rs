//! AN-005: Dependency graph construction.
//!
//! Edges come from three sources: references in a node's configuration
//! (structured or templated), explicit `depends_on`, and stack inputs (every
//! node of a stack depends on every node of each input stack). Cycles are
//! rejected with a three-color depth-first search before anything runs.
//! Execution order is Kahn's algorithm with declaration-order tie-breaking.

use super::error::GraphError;
use super::model::{qualify_path, ResourceNode, Stack};
use super::resolver;
use super::types::ConfigValue;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write;

/// Stack membership and exports, kept after nodes are merged into the graph.
#[derive(Debug, Clone)]
pub struct StackInfo {
    pub name: String,
    pub inputs: Vec<String>,
    /// Node indices in declaration order
    pub nodes: Vec<usize>,
    pub exports: IndexMap<String, ConfigValue>,
}

/// All nodes of all stacks with their dependency edges. Always acyclic.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceNode>,
    index: FxHashMap<String, usize>,
    /// `deps[i]`: nodes that `i` depends on
    deps: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes that depend on `i`
    dependents: Vec<Vec<usize>>,
    stacks: Vec<StackInfo>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Merge stacks into one graph, collect edges and reject cycles.
    pub fn build(stacks: Vec<Stack>) -> Result<Self, GraphError> {
        let mut graph = Self {
            nodes: Vec::new(),
            index: FxHashMap::default(),
            deps: Vec::new(),
            dependents: Vec::new(),
            stacks: Vec::new(),
        };

        for stack in stacks {
            let (name, inputs, nodes, exports) = stack.into_parts();
            if graph.stacks.iter().any(|s| s.name == name) {
                return Err(GraphError::DuplicateStack(name));
            }
            let mut members = Vec::with_capacity(nodes.len());
            for node in nodes {
                let id = node.qualified_id();
                if graph.index.contains_key(&id) {
                    return Err(GraphError::DuplicateId {
                        stack: name.clone(),
                        id: node.id().to_string(),
                    });
                }
                let idx = graph.nodes.len();
                graph.index.insert(id, idx);
                graph.nodes.push(node);
                members.push(idx);
            }
            graph.stacks.push(StackInfo {
                name,
                inputs,
                nodes: members,
                exports,
            });
        }

        graph.collect_edges()?;
        graph.check_exports()?;
        graph.detect_cycle()?;
        Ok(graph)
    }

    fn collect_edges(&mut self) -> Result<(), GraphError> {
        let n = self.nodes.len();
        self.deps = vec![Vec::new(); n];
        self.dependents = vec![Vec::new(); n];

        let mut stack_members: FxHashMap<&str, &[usize]> = FxHashMap::default();
        for info in &self.stacks {
            stack_members.insert(info.name.as_str(), info.nodes.as_slice());
        }

        let mut edges: Vec<(usize, usize)> = Vec::new();
        for info in &self.stacks {
            let mut input_nodes = Vec::new();
            for input in &info.inputs {
                let members = stack_members
                    .get(input.as_str())
                    .ok_or_else(|| GraphError::UnknownStack {
                        stack: info.name.clone(),
                        input: input.clone(),
                    })?;
                input_nodes.extend_from_slice(members);
            }

            for &idx in &info.nodes {
                let node = &self.nodes[idx];
                let owner = node.qualified_id();

                let references = resolver::collect_references(&node.config).map_err(|raw| {
                    GraphError::InvalidReference {
                        node: owner.clone(),
                        reference: raw,
                    }
                })?;
                let targets = references
                    .iter()
                    .map(|r| r.node.as_str())
                    .chain(node.depends_on.iter().map(String::as_str));
                for target in targets {
                    let target_id = qualify_path(node.stack(), target);
                    let target_idx = *self.index.get(&target_id).ok_or_else(|| {
                        GraphError::UnknownReference {
                            node: owner.clone(),
                            target: target_id.clone(),
                        }
                    })?;
                    edges.push((idx, target_idx));
                }
                for &input_idx in &input_nodes {
                    edges.push((idx, input_idx));
                }
            }
        }

        for (from, to) in edges {
            if !self.deps[from].contains(&to) {
                self.deps[from].push(to);
                self.dependents[to].push(from);
            }
        }
        Ok(())
    }

    fn check_exports(&self) -> Result<(), GraphError> {
        for info in &self.stacks {
            for (name, value) in &info.exports {
                let owner = format!("{} (output {})", info.name, name);
                let mut cfg = IndexMap::new();
                cfg.insert(name.clone(), value.clone());
                let references = resolver::collect_references(&cfg).map_err(|raw| {
                    GraphError::InvalidReference {
                        node: owner.clone(),
                        reference: raw,
                    }
                })?;
                for reference in references {
                    let target_id = qualify_path(&info.name, &reference.node);
                    if !self.index.contains_key(&target_id) {
                        return Err(GraphError::UnknownReference {
                            node: owner,
                            target: target_id,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn detect_cycle(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut path = Vec::new();
        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(&self, idx: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Result<(), GraphError> {
        marks[idx] = Mark::InProgress;
        path.push(idx);
        for &dep in &self.deps[idx] {
            match marks[dep] {
                Mark::InProgress => {
                    let pos = path.iter().position(|&p| p == dep).unwrap_or(0);
                    let cycle = path[pos..]
                        .iter()
                        .map(|&i| self.nodes[i].qualified_id())
                        .collect();
                    return Err(GraphError::CyclicDependency { cycle });
                }
                Mark::Unvisited => self.visit(dep, marks, path)?,
                Mark::Done => {}
            }
        }
        path.pop();
        marks[idx] = Mark::Done;
        Ok(())
    }

    /// One topological order; ready nodes are taken in declaration order.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &self.dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }

    /// Topological order as qualified ids.
    pub fn execution_order(&self) -> Vec<String> {
        self.topological_order()
            .into_iter()
            .map(|i| self.nodes[i].qualified_id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    pub fn get(&self, qualified_id: &str) -> Option<&ResourceNode> {
        self.index.get(qualified_id).map(|&i| &self.nodes[i])
    }

    pub fn index_of(&self, qualified_id: &str) -> Option<usize> {
        self.index.get(qualified_id).copied()
    }

    pub fn node(&self, idx: usize) -> &ResourceNode {
        &self.nodes[idx]
    }

    #[cfg(test)]
    pub(crate) fn node_mut(&mut self, qualified_id: &str) -> Option<&mut ResourceNode> {
        let idx = *self.index.get(qualified_id)?;
        Some(&mut self.nodes[idx])
    }

    pub(crate) fn node_at_mut(&mut self, idx: usize) -> &mut ResourceNode {
        &mut self.nodes[idx]
    }

    /// Nodes that `idx` depends on.
    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    /// Nodes that depend on `idx`.
    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    pub fn stacks(&self) -> &[StackInfo] {
        &self.stacks
    }

    /// Graphviz rendering; edges point from prerequisite to dependent.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph andamio {\n  rankdir=LR;\n");
        for info in &self.stacks {
            let _ = writeln!(out, "  subgraph \"cluster_{}\" {{", info.name);
            let _ = writeln!(out, "    label=\"{}\";", info.name);
            for &idx in &info.nodes {
                let node = &self.nodes[idx];
                let _ = writeln!(
                    out,
                    "    \"{}\" [label=\"{}\\n({})\"];",
                    node.qualified_id(),
                    node.id(),
                    node.kind
                );
            }
            out.push_str("  }\n");
        }
        for (idx, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\";",
                    self.nodes[dep].qualified_id(),
                    self.nodes[idx].qualified_id()
                );
            }
        }
        out.push_str("}\n");
        out
    }
}
