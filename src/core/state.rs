//! AN-008: State lock management: load, atomic save, capture and restore.
//!
//! The lock records, per qualified node id, the outcome of the last
//! provisioning call plus the configuration hash it ran with. Restoring a
//! lock into a fresh graph is how a later process resumes a partial apply.

use super::error::StateError;
use super::graph::DependencyGraph;
use super::model::NodeState;
use super::types::*;
use crate::tripwire::{eventlog::now_iso8601, hasher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Derive the lock file path for a project within the state directory.
pub fn lock_file_path(state_dir: &Path, project: &str) -> PathBuf {
    state_dir.join(project).join("state.lock.yaml")
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError {
    let path = path.display().to_string();
    move |source| StateError::Io { path, source }
}

/// Load a project's lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, project: &str) -> Result<Option<StateLock>, StateError> {
    let path = lock_file_path(state_dir, project);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(io_error(&path))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content).map_err(|e| StateError::Format {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), StateError> {
    let path = lock_file_path(state_dir, &lock.project);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| StateError::Format {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(io_error(&tmp_path))?;
    std::fs::rename(&tmp_path, &path).map_err(io_error(&path))?;
    Ok(())
}

/// Create a new empty StateLock for a project.
pub fn new_lock(project: &str) -> StateLock {
    StateLock {
        schema: "1.0".to_string(),
        project: project.to_string(),
        generated_at: now_iso8601(),
        generator: format!("andamio {}", env!("CARGO_PKG_VERSION")),
        nodes: indexmap::IndexMap::new(),
    }
}

/// Fold the graph's current node states into a lock.
///
/// Entries for nodes that never started this run are carried over unchanged.
/// A failed node keeps the outputs recorded by its last success so destroy
/// can still find it.
pub fn capture(graph: &DependencyGraph, previous: Option<&StateLock>, result: &ApplyResult) -> StateLock {
    let mut lock = new_lock(&result.project);
    if let Some(prev) = previous {
        lock.nodes = prev.nodes.clone();
    }
    let now = now_iso8601();

    for idx in graph.topological_order() {
        let node = graph.node(idx);
        let id = node.qualified_id();
        let prior = lock.nodes.get(&id).cloned();
        let entry = match node.state() {
            NodeState::Resolved => {
                let fresh = result.resolved.iter().find(|r| r.node == id && !r.cached);
                NodeLock {
                    kind: node.kind,
                    status: NodeStatus::Resolved,
                    applied_at: match fresh {
                        Some(_) => Some(now.clone()),
                        None => prior.as_ref().and_then(|p| p.applied_at.clone()),
                    },
                    duration_seconds: match fresh {
                        Some(r) => r.duration_seconds,
                        None => prior.as_ref().and_then(|p| p.duration_seconds),
                    },
                    hash: hasher::hash_node(node),
                    outputs: node.outputs().cloned().unwrap_or_default(),
                }
            }
            NodeState::Failed => NodeLock {
                kind: node.kind,
                status: NodeStatus::Failed,
                applied_at: Some(now.clone()),
                duration_seconds: None,
                hash: hasher::hash_node(node),
                outputs: prior.map(|p| p.outputs).unwrap_or_default(),
            },
            NodeState::Unresolved | NodeState::Resolving => continue,
        };
        lock.nodes.insert(id, entry);
    }
    lock
}

/// Mark converged lock entries resolved in a fresh graph.
///
/// Walks in topological order; an entry is restored only when it converged,
/// its hash matches the declared configuration and every dependency is
/// resolved. Returns the restored ids.
pub fn restore(graph: &mut DependencyGraph, lock: &StateLock) -> Vec<String> {
    let mut restored = Vec::new();
    for idx in graph.topological_order() {
        let node = graph.node(idx);
        if node.is_resolved() {
            continue;
        }
        let id = node.qualified_id();
        let Some(entry) = lock.nodes.get(&id) else {
            continue;
        };
        if entry.status != NodeStatus::Resolved || entry.hash != hasher::hash_node(node) {
            debug!(node = %id, "lock entry stale, not restored");
            continue;
        }
        if !graph.dependencies(idx).iter().all(|&d| graph.node(d).is_resolved()) {
            continue;
        }
        if graph.node_at_mut(idx).resolve(entry.outputs.clone()).is_ok() {
            restored.push(id);
        }
    }
    restored
}

/// Whether a lock entry stands for a live resource that teardown must reach.
///
/// A failed entry still counts when it carries outputs from an earlier success.
pub(crate) fn is_tracked(entry: &NodeLock) -> bool {
    match entry.status {
        NodeStatus::Resolved => true,
        NodeStatus::Failed => !entry.outputs.is_empty(),
    }
}

/// Load every tracked entry's outputs for teardown, ignoring hashes.
pub fn restore_for_destroy(graph: &mut DependencyGraph, lock: &StateLock) -> usize {
    let mut count = 0;
    for idx in 0..graph.len() {
        let id = graph.node(idx).qualified_id();
        let Some(entry) = lock.nodes.get(&id) else {
            continue;
        };
        if is_tracked(entry)
            && !graph.node(idx).is_resolved()
            && graph.node_at_mut(idx).resolve(entry.outputs.clone()).is_ok()
        {
            count += 1;
        }
    }
    count
}

/// Drop the entries of destroyed nodes.
pub fn forget(lock: &mut StateLock, result: &DestroyResult) {
    let gone: HashSet<&str> = result.destroyed.iter().map(|d| d.node.as_str()).collect();
    lock.nodes.retain(|id, _| !gone.contains(id.as_str()));
    lock.generated_at = now_iso8601();
}
