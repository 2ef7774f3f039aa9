//! AN-007: Plan generation by diffing the declared graph against the state lock.

use super::graph::DependencyGraph;
use super::model::ResourceNode;
use super::state;
use super::types::*;
use crate::tripwire::hasher;

/// Generate an apply plan by comparing declared nodes to lock entries.
///
/// A node is re-applied when its own configuration hash changed, its last
/// attempt failed, or any of its dependencies will be created or updated
/// (their outputs may change under it).
pub fn plan(graph: &DependencyGraph, name: &str, lock: Option<&StateLock>) -> ExecutionPlan {
    let mut actions = vec![PlanAction::NoOp; graph.len()];
    let mut changes = Vec::new();

    for idx in graph.topological_order() {
        let node = graph.node(idx);
        let upstream_changed = graph
            .dependencies(idx)
            .iter()
            .any(|&d| actions[d] != PlanAction::NoOp);
        let (action, reason) = determine_action(node, lock, upstream_changed);
        actions[idx] = action;
        changes.push(PlannedChange {
            node: node.qualified_id(),
            stack: node.stack().to_string(),
            kind: node.kind,
            action,
            description: describe_action(node, action, reason),
        });
    }

    summarize(name, changes)
}

/// Generate a teardown plan: every tracked lock entry, dependents first.
pub fn plan_destroy(graph: &DependencyGraph, name: &str, lock: Option<&StateLock>) -> ExecutionPlan {
    let mut order = graph.topological_order();
    order.reverse();
    let changes = order
        .into_iter()
        .map(|idx| {
            let node = graph.node(idx);
            let id = node.qualified_id();
            let recorded = lock
                .and_then(|l| l.nodes.get(&id))
                .is_some_and(state::is_tracked);
            let (action, reason) = if recorded {
                (PlanAction::Destroy, None)
            } else {
                (PlanAction::NoOp, Some("not recorded in lock"))
            };
            PlannedChange {
                node: id,
                stack: node.stack().to_string(),
                kind: node.kind,
                action,
                description: describe_action(node, action, reason),
            }
        })
        .collect();

    summarize(name, changes)
}

fn summarize(name: &str, changes: Vec<PlannedChange>) -> ExecutionPlan {
    let count = |a: PlanAction| changes.iter().filter(|c| c.action == a).count() as u32;
    ExecutionPlan {
        name: name.to_string(),
        to_create: count(PlanAction::Create),
        to_update: count(PlanAction::Update),
        to_destroy: count(PlanAction::Destroy),
        unchanged: count(PlanAction::NoOp),
        changes,
    }
}

fn determine_action(
    node: &ResourceNode,
    lock: Option<&StateLock>,
    upstream_changed: bool,
) -> (PlanAction, Option<&'static str>) {
    let Some(entry) = lock.and_then(|l| l.nodes.get(&node.qualified_id())) else {
        return (PlanAction::Create, None);
    };
    if entry.status == NodeStatus::Failed {
        return (PlanAction::Update, Some("previous attempt failed"));
    }
    if entry.hash != hasher::hash_node(node) {
        return (PlanAction::Update, Some("configuration changed"));
    }
    if upstream_changed {
        return (PlanAction::Update, Some("dependency changes"));
    }
    (PlanAction::NoOp, None)
}

/// Human-readable description of a planned action.
pub fn describe_action(node: &ResourceNode, action: PlanAction, reason: Option<&str>) -> String {
    let base = match action {
        PlanAction::Create => format!("{}: create {}", node.qualified_id(), node.kind),
        PlanAction::Update => format!("{}: update {}", node.qualified_id(), node.kind),
        PlanAction::Destroy => format!("{}: destroy {}", node.qualified_id(), node.kind),
        PlanAction::NoOp => format!("{}: no changes", node.qualified_id()),
    };
    match reason {
        Some(r) => format!("{} ({})", base, r),
        None => base,
    }
}
