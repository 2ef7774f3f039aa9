//! AN-012: Executor for dependency-ordered apply and reverse-ordered destroy.
//!
//! apply: reset failed → topological order → for each node: resolve config →
//! provision → record outputs → events. The first failure halts the walk;
//! resolved nodes keep their outputs so a later apply resumes where it stopped.

use super::error::{NodeError, ProvisionError};
use super::graph::DependencyGraph;
use super::model::NodeState;
use super::resolver;
use super::types::*;
use crate::provider::Provisioner;
use crate::tripwire::{eventlog, hasher};
use indexmap::IndexMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for an apply or destroy run.
#[derive(Debug, Clone, Copy)]
pub struct ApplyConfig<'a> {
    /// Project name; scopes the event log
    pub project: &'a str,
    /// Where provenance events go; `None` keeps the run in memory
    pub state_dir: Option<&'a Path>,
    pub tripwire: bool,
}

impl<'a> ApplyConfig<'a> {
    /// A run that writes no provenance.
    pub fn in_memory(project: &'a str) -> Self {
        Self {
            project,
            state_dir: None,
            tripwire: false,
        }
    }
}

/// Log a tripwire event if tripwire is enabled. Write failures never abort a run.
pub(crate) fn log_tripwire(cfg: &ApplyConfig, event: ProvenanceEvent) {
    if !cfg.tripwire {
        return;
    }
    if let Some(state_dir) = cfg.state_dir {
        if let Err(e) = eventlog::append_event(state_dir, cfg.project, event) {
            warn!(project = cfg.project, error = %e, "cannot append provenance event");
        }
    }
}

/// Accumulates the outcome of one apply walk.
pub(crate) struct RunRecorder<'a> {
    cfg: ApplyConfig<'a>,
    start: Instant,
    run_id: String,
    resolved: Vec<ResolvedNode>,
    failures: Vec<ApplyFailure>,
    provisioned: u32,
    unchanged: u32,
}

impl<'a> RunRecorder<'a> {
    pub(crate) fn start(cfg: ApplyConfig<'a>) -> Self {
        let run_id = eventlog::generate_run_id();
        info!(project = cfg.project, run_id = %run_id, "apply started");
        log_tripwire(
            &cfg,
            ProvenanceEvent::ApplyStarted {
                project: cfg.project.to_string(),
                run_id: run_id.clone(),
                andamio_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        Self {
            cfg,
            start: Instant::now(),
            run_id,
            resolved: Vec::new(),
            failures: Vec::new(),
            provisioned: 0,
            unchanged: 0,
        }
    }

    pub(crate) fn cached(&mut self, graph: &DependencyGraph, idx: usize) {
        let node = graph.node(idx);
        debug!(node = %node.qualified_id(), "already resolved, skipping");
        self.unchanged += 1;
        self.resolved.push(ResolvedNode {
            node: node.qualified_id(),
            kind: node.kind,
            outputs: node.outputs().cloned().unwrap_or_default(),
            cached: true,
            duration_seconds: None,
        });
    }

    pub(crate) fn node_started(&self, graph: &DependencyGraph, idx: usize) {
        let node = graph.node(idx);
        info!(node = %node.qualified_id(), kind = %node.kind, "provisioning");
        log_tripwire(
            &self.cfg,
            ProvenanceEvent::NodeStarted {
                project: self.cfg.project.to_string(),
                node: node.qualified_id(),
                kind: node.kind,
            },
        );
    }

    /// Store outputs on the node and record the success.
    pub(crate) fn node_finished(
        &mut self,
        graph: &mut DependencyGraph,
        idx: usize,
        result: Result<Outputs, ProvisionError>,
        duration: f64,
    ) -> Result<(), ()> {
        let outcome = result
            .map_err(NodeError::from)
            .and_then(|outputs| {
                graph
                    .node_at_mut(idx)
                    .resolve(outputs.clone())
                    .map(|()| outputs)
                    .map_err(NodeError::from)
            });
        match outcome {
            Ok(outputs) => {
                let node = graph.node(idx);
                let id = node.qualified_id();
                info!(node = %id, duration_ms = (duration * 1000.0) as u64, "resolved");
                log_tripwire(
                    &self.cfg,
                    ProvenanceEvent::NodeResolved {
                        project: self.cfg.project.to_string(),
                        node: id.clone(),
                        duration_seconds: duration,
                        outputs_hash: hasher::hash_outputs(&outputs),
                    },
                );
                self.provisioned += 1;
                self.resolved.push(ResolvedNode {
                    node: id,
                    kind: node.kind,
                    outputs,
                    cached: false,
                    duration_seconds: Some(duration),
                });
                Ok(())
            }
            Err(error) => {
                self.node_failed(graph, idx, error);
                Err(())
            }
        }
    }

    /// Mark the node failed and record the error.
    pub(crate) fn node_failed(&mut self, graph: &mut DependencyGraph, idx: usize, error: NodeError) {
        let node = graph.node_at_mut(idx);
        node.fail();
        let id = node.qualified_id();
        warn!(node = %id, error = %error, "node failed");
        log_tripwire(
            &self.cfg,
            ProvenanceEvent::NodeFailed {
                project: self.cfg.project.to_string(),
                node: id.clone(),
                error: error.to_string(),
            },
        );
        self.failures.push(ApplyFailure { node: id, error });
    }

    pub(crate) fn finish(self, graph: &DependencyGraph, pending: Vec<String>, cancelled: bool) -> ApplyResult {
        let total_seconds = self.start.elapsed().as_secs_f64();
        let failed = self.failures.len() as u32;
        log_tripwire(
            &self.cfg,
            ProvenanceEvent::ApplyCompleted {
                project: self.cfg.project.to_string(),
                run_id: self.run_id.clone(),
                nodes_provisioned: self.provisioned,
                nodes_unchanged: self.unchanged,
                nodes_failed: failed,
                total_seconds,
            },
        );
        info!(
            project = self.cfg.project,
            provisioned = self.provisioned,
            unchanged = self.unchanged,
            failed,
            pending = pending.len(),
            cancelled,
            "apply completed"
        );
        ApplyResult {
            project: self.cfg.project.to_string(),
            run_id: self.run_id,
            resolved: self.resolved,
            failures: self.failures,
            pending,
            exports: resolve_exports(graph),
            cancelled,
            provisioned: self.provisioned,
            unchanged: self.unchanged,
            total_seconds,
        }
    }
}

/// Explicit retry: a new apply gives failed nodes another attempt.
pub(crate) fn reset_failed(graph: &mut DependencyGraph) {
    for idx in 0..graph.len() {
        let node = graph.node_at_mut(idx);
        if matches!(node.state(), NodeState::Failed | NodeState::Resolving) {
            node.reset();
        }
    }
}

/// Exports of every stack whose nodes are all resolved.
pub fn resolve_exports(graph: &DependencyGraph) -> IndexMap<String, IndexMap<String, serde_json::Value>> {
    let mut exports = IndexMap::new();
    for info in graph.stacks() {
        if info.exports.is_empty() || !info.nodes.iter().all(|&i| graph.node(i).is_resolved()) {
            continue;
        }
        let mut values = IndexMap::new();
        for (name, value) in &info.exports {
            let owner = format!("{} (output {})", info.name, name);
            match resolver::resolve_value(value, &info.name, &owner, graph) {
                Ok(v) => {
                    values.insert(name.clone(), v);
                }
                Err(e) => warn!(stack = %info.name, output = %name, error = %e, "cannot resolve export"),
            }
        }
        exports.insert(info.name.clone(), values);
    }
    exports
}

/// Walk the graph in topological order, provisioning every unresolved node.
pub fn apply(graph: &mut DependencyGraph, provisioner: &dyn Provisioner, cfg: &ApplyConfig) -> ApplyResult {
    reset_failed(graph);
    let mut run = RunRecorder::start(*cfg);
    let mut pending = Vec::new();
    let mut halted = false;

    for idx in graph.topological_order() {
        if graph.node(idx).is_resolved() {
            run.cached(graph, idx);
            continue;
        }
        if halted {
            pending.push(graph.node(idx).qualified_id());
            continue;
        }

        let resolved = match resolver::resolve(graph.node(idx), graph) {
            Ok(resolved) => resolved,
            Err(e) => {
                run.node_failed(graph, idx, e.into());
                halted = true;
                continue;
            }
        };

        graph.node_at_mut(idx).mark_resolving();
        run.node_started(graph, idx);
        let started = Instant::now();
        let result = provisioner.provision(graph.node(idx), &resolved);
        let duration = started.elapsed().as_secs_f64();
        if run.node_finished(graph, idx, result, duration).is_err() {
            halted = true;
        }
    }

    run.finish(graph, pending, false)
}

/// Tear down every node in reverse topological order.
///
/// "Already absent" counts as success, so destroy can be re-run after a
/// partial teardown. Destroyed nodes return to `unresolved`.
pub fn destroy(graph: &mut DependencyGraph, provisioner: &dyn Provisioner, cfg: &ApplyConfig) -> DestroyResult {
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    info!(project = cfg.project, run_id = %run_id, "destroy started");
    log_tripwire(
        cfg,
        ProvenanceEvent::DestroyStarted {
            project: cfg.project.to_string(),
            run_id: run_id.clone(),
        },
    );

    let mut destroyed = Vec::new();
    let mut failure = None;
    let mut pending = Vec::new();

    let mut order = graph.topological_order();
    order.reverse();
    for idx in order {
        let id = graph.node(idx).qualified_id();
        if failure.is_some() {
            pending.push(id);
            continue;
        }
        let node = graph.node(idx);
        let result = provisioner.destroy(node, node.outputs());
        let absent = match result {
            Ok(()) => false,
            Err(ProvisionError::NotFound) => true,
            Err(e) => {
                warn!(node = %id, error = %e, "destroy failed");
                log_tripwire(
                    cfg,
                    ProvenanceEvent::NodeFailed {
                        project: cfg.project.to_string(),
                        node: id.clone(),
                        error: e.to_string(),
                    },
                );
                failure = Some(ApplyFailure {
                    node: id,
                    error: e.into(),
                });
                continue;
            }
        };
        info!(node = %id, absent, "destroyed");
        graph.node_at_mut(idx).reset();
        log_tripwire(
            cfg,
            ProvenanceEvent::NodeDestroyed {
                project: cfg.project.to_string(),
                node: id.clone(),
                absent,
            },
        );
        destroyed.push(DestroyedNode { node: id, absent });
    }

    let total_seconds = start.elapsed().as_secs_f64();
    log_tripwire(
        cfg,
        ProvenanceEvent::DestroyCompleted {
            project: cfg.project.to_string(),
            run_id: run_id.clone(),
            nodes_destroyed: destroyed.len() as u32,
            nodes_failed: u32::from(failure.is_some()),
            total_seconds,
        },
    );

    DestroyResult {
        project: cfg.project.to_string(),
        run_id,
        destroyed,
        failure,
        pending,
        total_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GraphError;
    use crate::core::model::{config, Stack};
    use crate::provider::testing::{Call, Recorder};
    use proptest::prelude::*;

    fn chain(ids: &[&str]) -> DependencyGraph {
        let mut s = Stack::new("app");
        for (i, id) in ids.iter().enumerate() {
            let node = s
                .define_node(id, ResourceKind::Secret, IndexMap::new())
                .unwrap();
            if i > 0 {
                node.depends_on(ids[i - 1]);
            }
        }
        DependencyGraph::build(vec![s]).unwrap()
    }

    fn cfg() -> ApplyConfig<'static> {
        ApplyConfig::in_memory("test")
    }

    #[test]
    fn test_an012_linear_chain_order() {
        let mut s = Stack::new("app");
        s.define_node("network", ResourceKind::Network, IndexMap::new()).unwrap();
        s.define_node(
            "cluster",
            ResourceKind::Cluster,
            config([("vpc", ConfigValue::reference("network", "id"))]),
        )
        .unwrap();
        s.define_node(
            "database",
            ResourceKind::DatabaseInstance,
            config([("cluster", ConfigValue::reference("cluster", "id"))]),
        )
        .unwrap();
        s.define_node(
            "service",
            ResourceKind::LoadBalancedService,
            config([("db", ConfigValue::reference("database", "endpointAddress"))]),
        )
        .unwrap();
        let mut graph = DependencyGraph::build(vec![s]).unwrap();
        let rec = Recorder::new();
        let result = apply(&mut graph, &rec, &cfg());
        assert!(result.is_success());
        assert_eq!(
            rec.provisioned(),
            vec!["app/network", "app/cluster", "app/database", "app/service"]
        );
        assert_eq!(result.provisioned, 4);
        assert!(graph.nodes().iter().all(|n| n.is_resolved()));
    }

    #[test]
    fn test_an012_reference_substitution() {
        let mut db = Stack::new("database");
        db.define_node("db", ResourceKind::DatabaseInstance, IndexMap::new())
            .unwrap();
        let mut svc = Stack::new("service").with_input("database");
        svc.define_node(
            "app",
            ResourceKind::LoadBalancedService,
            config([
                ("db_host", ConfigValue::reference("database/db", "endpointAddress")),
                (
                    "jdbc",
                    ConfigValue::from("jdbc:mysql://{{ref.database/db.endpointAddress}}:3306/notes_app"),
                ),
            ]),
        )
        .unwrap();
        let mut graph = DependencyGraph::build(vec![db, svc]).unwrap();
        let rec = Recorder::new();
        apply(&mut graph, &rec, &cfg());
        let seen = rec.config_of("service/app").unwrap();
        assert_eq!(seen["db_host"], serde_json::json!("db.example.internal"));
        assert_eq!(
            seen["jdbc"],
            serde_json::json!("jdbc:mysql://db.example.internal:3306/notes_app")
        );
    }

    #[test]
    fn test_an012_diamond() {
        let mut s = Stack::new("d");
        s.define_node("network", ResourceKind::Network, IndexMap::new()).unwrap();
        s.define_node("cluster", ResourceKind::Cluster, IndexMap::new())
            .unwrap()
            .depends_on("network");
        s.define_node("database", ResourceKind::DatabaseInstance, IndexMap::new())
            .unwrap()
            .depends_on("network");
        s.define_node("service", ResourceKind::LoadBalancedService, IndexMap::new())
            .unwrap()
            .depends_on("cluster")
            .depends_on("database");
        let mut graph = DependencyGraph::build(vec![s]).unwrap();
        let rec = Recorder::new();
        apply(&mut graph, &rec, &cfg());
        let order = rec.provisioned();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert_eq!(pos("d/network"), 0);
        assert!(pos("d/cluster") < pos("d/service"));
        assert!(pos("d/database") < pos("d/service"));
        assert_eq!(pos("d/service"), 3);
    }

    #[test]
    fn test_an012_idempotent_reapply() {
        let mut graph = chain(&["a", "b", "c"]);
        let first = Recorder::new();
        let r1 = apply(&mut graph, &first, &cfg());
        assert_eq!(r1.provisioned, 3);

        let second = Recorder::new();
        let r2 = apply(&mut graph, &second, &cfg());
        assert!(second.provisioned().is_empty());
        assert_eq!(r2.provisioned, 0);
        assert_eq!(r2.unchanged, 3);
        assert!(r2.resolved.iter().all(|r| r.cached));
        for (a, b) in r1.resolved.iter().zip(&r2.resolved) {
            assert_eq!(a.node, b.node);
            assert_eq!(a.outputs, b.outputs);
        }
    }

    #[test]
    fn test_an012_partial_failure_then_resume() {
        let mut graph = chain(&["n1", "n2", "n3", "n4", "n5"]);
        let rec = Recorder::failing(&["app/n3"]);
        let r1 = apply(&mut graph, &rec, &cfg());
        assert_eq!(r1.resolved_ids(), vec!["app/n1", "app/n2"]);
        assert_eq!(r1.failures.len(), 1);
        assert_eq!(r1.failure().unwrap().node, "app/n3");
        assert!(matches!(r1.failure().unwrap().error, NodeError::Provision(_)));
        assert_eq!(r1.pending, vec!["app/n4", "app/n5"]);
        assert_eq!(graph.get("app/n3").unwrap().state(), NodeState::Failed);
        assert_eq!(graph.get("app/n4").unwrap().state(), NodeState::Unresolved);

        rec.heal("app/n3");
        rec.calls.lock().unwrap().clear();
        let r2 = apply(&mut graph, &rec, &cfg());
        assert!(r2.is_success());
        assert_eq!(rec.provisioned(), vec!["app/n3", "app/n4", "app/n5"]);
        assert_eq!(r2.unchanged, 2);
        assert_eq!(r2.provisioned, 3);
    }

    #[test]
    fn test_an012_missing_attribute_fails_consumer() {
        let mut s = Stack::new("s");
        s.define_node("db", ResourceKind::DatabaseInstance, IndexMap::new())
            .unwrap();
        s.define_node(
            "app",
            ResourceKind::LoadBalancedService,
            config([("x", ConfigValue::reference("db", "readerEndpoint"))]),
        )
        .unwrap();
        let mut graph = DependencyGraph::build(vec![s]).unwrap();
        let rec = Recorder::new();
        let result = apply(&mut graph, &rec, &cfg());
        assert_eq!(rec.provisioned(), vec!["s/db"]);
        let failure = result.failure().unwrap();
        assert_eq!(failure.node, "s/app");
        assert!(matches!(
            failure.error,
            NodeError::Resolve(GraphError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn test_an012_exports_resolved() {
        let mut s = Stack::new("database");
        s.define_node("db", ResourceKind::DatabaseInstance, IndexMap::new())
            .unwrap();
        s.export("endpoint", ConfigValue::reference("db", "endpointAddress"));
        s.export("jdbc", ConfigValue::from("jdbc:mysql://{{ref.db.endpointAddress}}:3306/notes_app"));
        let mut graph = DependencyGraph::build(vec![s]).unwrap();
        let result = apply(&mut graph, &Recorder::new(), &cfg());
        assert_eq!(
            result.exports["database"]["endpoint"],
            serde_json::json!("db.example.internal")
        );
        assert_eq!(
            result.exports["database"]["jdbc"],
            serde_json::json!("jdbc:mysql://db.example.internal:3306/notes_app")
        );
    }

    #[test]
    fn test_an012_exports_skipped_for_incomplete_stack() {
        let mut s = Stack::new("database");
        s.define_node("db", ResourceKind::DatabaseInstance, IndexMap::new())
            .unwrap();
        s.export("endpoint", ConfigValue::reference("db", "endpointAddress"));
        let mut graph = DependencyGraph::build(vec![s]).unwrap();
        let result = apply(&mut graph, &Recorder::failing(&["database/db"]), &cfg());
        assert!(result.exports.is_empty());
    }

    #[test]
    fn test_an012_events_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = chain(&["a", "b"]);
        let run_cfg = ApplyConfig {
            project: "demo",
            state_dir: Some(dir.path()),
            tripwire: true,
        };
        apply(&mut graph, &Recorder::failing(&["app/b"]), &run_cfg);
        let content = std::fs::read_to_string(dir.path().join("demo/events.jsonl")).unwrap();
        assert!(content.contains("apply_started"));
        assert!(content.contains("node_resolved"));
        assert!(content.contains("node_failed"));
        assert!(content.contains("apply_completed"));
    }

    #[test]
    fn test_an012_no_events_without_tripwire() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = chain(&["a"]);
        let run_cfg = ApplyConfig {
            project: "demo",
            state_dir: Some(dir.path()),
            tripwire: false,
        };
        apply(&mut graph, &Recorder::new(), &run_cfg);
        assert!(!dir.path().join("demo/events.jsonl").exists());
    }

    #[test]
    fn test_an012_destroy_reverse_order() {
        let mut graph = chain(&["net", "cluster", "svc"]);
        let rec = Recorder::new();
        apply(&mut graph, &rec, &cfg());
        let result = destroy(&mut graph, &rec, &cfg());
        assert_eq!(rec.destroyed(), vec!["app/svc", "app/cluster", "app/net"]);
        assert!(result.failure.is_none());
        assert!(result.destroyed.iter().all(|d| !d.absent));
        assert!(graph.nodes().iter().all(|n| n.state() == NodeState::Unresolved));
    }

    #[test]
    fn test_an012_destroy_tolerates_absent() {
        let mut graph = chain(&["net", "svc"]);
        let rec = Recorder::new();
        let first = destroy(&mut graph, &rec, &cfg());
        assert!(first.failure.is_none());
        assert!(first.destroyed.iter().all(|d| d.absent));
        let again = destroy(&mut graph, &rec, &cfg());
        assert_eq!(again.destroyed.len(), 2);
    }

    #[test]
    fn test_an012_destroy_reports_absent_with_outputs() {
        let mut graph = chain(&["net", "svc"]);
        apply(&mut graph, &Recorder::new(), &cfg());
        let rec = Recorder::new().absent_on_destroy(&["app/svc"]);
        let result = destroy(&mut graph, &rec, &cfg());
        assert!(result.failure.is_none());
        assert!(rec.destroyed_outputs("app/svc").is_some());
        let absent: Vec<_> = result.destroyed.iter().map(|d| (d.node.as_str(), d.absent)).collect();
        assert_eq!(absent, vec![("app/svc", true), ("app/net", false)]);
    }

    #[test]
    fn test_an012_destroy_halts_on_failure() {
        let mut graph = chain(&["net", "cluster", "svc"]);
        let ok = Recorder::new();
        apply(&mut graph, &ok, &cfg());
        let stuck = Recorder::failing(&["app/cluster"]);
        let result = destroy(&mut graph, &stuck, &cfg());
        assert_eq!(result.failure.as_ref().unwrap().node, "app/cluster");
        assert_eq!(result.pending, vec!["app/net"]);
        assert!(graph.get("app/net").unwrap().is_resolved());
        assert!(graph.get("app/cluster").unwrap().is_resolved());
        assert_eq!(graph.get("app/svc").unwrap().state(), NodeState::Unresolved);
    }

    #[test]
    fn test_an012_result_serializes() {
        let mut graph = chain(&["a", "b"]);
        let result = apply(&mut graph, &Recorder::failing(&["app/b"]), &cfg());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["failures"][0]["node"], "app/b");
        assert_eq!(json["failures"][0]["error"], "provisioning failed: app/b rejected");
        assert_eq!(json["resolved"][0]["node"], "app/a");
    }

    /// Random DAG: node i may depend only on nodes declared before it.
    fn random_dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1usize..24).prop_flat_map(|n| {
            (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        #[test]
        fn test_an012_every_node_once_after_predecessors(deps in random_dag()) {
            let mut s = Stack::new("p");
            for (i, node_deps) in deps.iter().enumerate() {
                let node = s
                    .define_node(&format!("n{}", i), ResourceKind::Secret, IndexMap::new())
                    .unwrap();
                for &d in node_deps {
                    if d < i {
                        node.depends_on(format!("n{}", d));
                    }
                }
            }
            let mut graph = DependencyGraph::build(vec![s]).unwrap();
            let rec = Recorder::new();
            let result = apply(&mut graph, &rec, &cfg());
            prop_assert!(result.is_success());

            let calls = rec.calls.lock().unwrap().clone();
            let starts: Vec<_> = calls.iter().filter(|c| matches!(c, Call::Start(_))).collect();
            prop_assert_eq!(starts.len(), deps.len());
            for (i, node_deps) in deps.iter().enumerate() {
                let start = calls.iter().position(|c| *c == Call::Start(format!("p/n{}", i))).unwrap();
                for &d in node_deps {
                    if d < i {
                        let end = calls.iter().position(|c| *c == Call::End(format!("p/n{}", d))).unwrap();
                        prop_assert!(end < start);
                    }
                }
            }
        }
    }
}
