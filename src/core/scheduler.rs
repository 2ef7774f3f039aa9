//! AN-013: Bounded-concurrency apply.
//!
//! The coordinator owns the graph, the in-degree counters and every node
//! state write. Provisioning calls run on the blocking pool; a node is
//! dispatched only once all of its dependencies are resolved. On failure or
//! cancellation no new node starts, in-flight calls run to completion and
//! their outcomes are recorded.

use super::error::ProvisionError;
use super::executor::{reset_failed, ApplyConfig, RunRecorder};
use super::graph::DependencyGraph;
use super::model::NodeState;
use super::resolver;
use super::types::{ApplyResult, Outputs};
use crate::provider::Provisioner;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Completion = (usize, Result<(Result<Outputs, ProvisionError>, f64), tokio::task::JoinError>);

/// Apply with at most `max_concurrency` provisioning calls in flight.
///
/// Ties between ready nodes go to declaration order, so `max_concurrency == 1`
/// provisions in the same order as [`super::executor::apply`].
pub async fn apply_concurrent(
    graph: &mut DependencyGraph,
    provisioner: Arc<dyn Provisioner>,
    max_concurrency: usize,
    cancel: CancellationToken,
    cfg: &ApplyConfig<'_>,
) -> ApplyResult {
    let limit = max_concurrency.max(1);
    reset_failed(graph);
    let mut run = RunRecorder::start(*cfg);

    let mut remaining = vec![0usize; graph.len()];
    let mut ready = BinaryHeap::new();
    for idx in graph.topological_order() {
        if graph.node(idx).is_resolved() {
            run.cached(graph, idx);
            continue;
        }
        remaining[idx] = graph
            .dependencies(idx)
            .iter()
            .filter(|&&d| !graph.node(d).is_resolved())
            .count();
        if remaining[idx] == 0 {
            ready.push(Reverse(idx));
        }
    }

    let mut in_flight: JoinSet<Completion> = JoinSet::new();
    let mut halted = false;
    let mut cancelled = false;

    loop {
        if !halted && cancel.is_cancelled() {
            info!(in_flight = in_flight.len(), "cancellation requested");
            halted = true;
            cancelled = true;
        }

        while !halted && in_flight.len() < limit {
            let Some(Reverse(idx)) = ready.pop() else {
                break;
            };
            let resolved = match resolver::resolve(graph.node(idx), graph) {
                Ok(resolved) => resolved,
                Err(e) => {
                    run.node_failed(graph, idx, e.into());
                    halted = true;
                    break;
                }
            };
            graph.node_at_mut(idx).mark_resolving();
            run.node_started(graph, idx);

            let node = graph.node(idx).clone();
            let provisioner = Arc::clone(&provisioner);
            let call = tokio::task::spawn_blocking(move || {
                let started = Instant::now();
                let result = provisioner.provision(&node, &resolved);
                (result, started.elapsed().as_secs_f64())
            });
            in_flight.spawn(async move { (idx, call.await) });
        }

        if in_flight.is_empty() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !halted => {
                info!(in_flight = in_flight.len(), "cancellation requested, waiting for in-flight calls");
                halted = true;
                cancelled = true;
            }
            Some(joined) = in_flight.join_next() => {
                let (idx, outcome) = match joined {
                    Ok(completion) => completion,
                    Err(e) => {
                        warn!(error = %e, "provisioning task lost");
                        halted = true;
                        continue;
                    }
                };
                let (result, duration) = match outcome {
                    Ok(done) => done,
                    Err(e) => (Err(ProvisionError::Transport(format!("provisioning call aborted: {}", e))), 0.0),
                };
                if run.node_finished(graph, idx, result, duration).is_err() {
                    halted = true;
                    continue;
                }
                for &dependent in graph.dependents(idx) {
                    remaining[dependent] = remaining[dependent].saturating_sub(1);
                    if remaining[dependent] == 0 && graph.node(dependent).state() == NodeState::Unresolved {
                        debug!(node = %graph.node(dependent).qualified_id(), "ready");
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }
    }

    let pending = graph
        .topological_order()
        .into_iter()
        .filter(|&idx| graph.node(idx).state() == NodeState::Unresolved)
        .map(|idx| graph.node(idx).qualified_id())
        .collect();
    run.finish(graph, pending, cancelled)
}
