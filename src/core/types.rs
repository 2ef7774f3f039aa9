//! AN-001: Project schema, node kinds, configuration values, state locks,
//! plans and provenance events.
//!
//! Every type that appears in `andamio.yaml` or the state lock derives
//! Serialize/Deserialize so configs and locks roundtrip through YAML.

use super::error::NodeError;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Attribute map produced by a provisioned node.
pub type Outputs = IndexMap<String, serde_json::Value>;

/// Node configuration with every reference replaced by a concrete value.
pub type ResolvedConfig = IndexMap<String, serde_json::Value>;

// ============================================================================
// Top-level andamio.yaml
// ============================================================================

/// Root configuration: the declared topology.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AndamioConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Project name; also names the state directory
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters, substituted into `{{params.key}}` templates at load
    #[serde(default)]
    pub params: HashMap<String, ConfigValue>,

    /// Tags merged into every node's `tags` config entry
    #[serde(default)]
    pub tags: IndexMap<String, String>,

    /// Control plane used to provision nodes
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Stack declarations (order-preserving)
    pub stacks: IndexMap<String, StackDecl>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

/// A named, deployable collection of resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StackDecl {
    #[serde(default)]
    pub description: Option<String>,

    /// Stacks whose resources must all exist before this stack's resources
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, NodeDecl>,

    /// Exported values available to operators and dependent stacks
    #[serde(default)]
    pub outputs: IndexMap<String, ConfigValue>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeDecl {
    pub kind: ResourceKind,

    /// Explicit dependencies (local id or `stack/id`)
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub config: IndexMap<String, ConfigValue>,
}

/// Resource kind enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Cluster,
    Secret,
    SecurityGroup,
    DatabaseInstance,
    LoadBalancedService,
    ScalingPolicy,
    Dashboard,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Cluster => write!(f, "cluster"),
            Self::Secret => write!(f, "secret"),
            Self::SecurityGroup => write!(f, "security_group"),
            Self::DatabaseInstance => write!(f, "database_instance"),
            Self::LoadBalancedService => write!(f, "load_balanced_service"),
            Self::ScalingPolicy => write!(f, "scaling_policy"),
            Self::Dashboard => write!(f, "dashboard"),
        }
    }
}

// ============================================================================
// Configuration values
// ============================================================================

/// Pointer to another node's output attribute.
///
/// `node` is either a local id (same stack) or a qualified `stack/id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "ref")]
    pub node: String,
    pub attr: String,
}

impl Reference {
    pub fn new(node: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attr: attr.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.attr)
    }
}

/// A configuration value: a literal, a nested tree, or a reference.
///
/// Strings may embed `{{ref.<node>.<attr>}}` templates, which count as
/// references for dependency analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ConfigValue {
    Ref(Reference),
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ConfigValue>),
    Map(IndexMap<String, ConfigValue>),
    Null,
}

impl ConfigValue {
    /// Shorthand for a structured reference value.
    pub fn reference(node: impl Into<String>, attr: impl Into<String>) -> Self {
        Self::Ref(Reference::new(node, attr))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for ConfigValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Reference> for ConfigValue {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

impl<V: Into<ConfigValue>> From<Vec<V>> for ConfigValue {
    fn from(items: Vec<V>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Provider and policy
// ============================================================================

/// Which control plane receives provisioning calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Deterministic in-process control plane
    #[default]
    Simulate,
    /// External hook invoked once per node via `bash -c`
    Script { command: String },
}

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Maximum provisioning calls in flight; 1 walks strictly sequentially
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    /// Append provenance events on every apply and destroy
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist the state lock after apply and destroy
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-project state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub schema: String,

    /// Project name
    pub project: String,

    /// When the lock was generated (RFC 3339)
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Per-node state keyed by qualified id
    pub nodes: IndexMap<String, NodeLock>,
}

/// Per-node lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLock {
    pub kind: ResourceKind,

    pub status: NodeStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the declared configuration
    pub hash: String,

    #[serde(default)]
    pub outputs: Outputs,
}

/// Persisted outcome of the last provisioning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Resolved,
    Failed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    pub node: String,
    pub stack: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub name: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        project: String,
        run_id: String,
        andamio_version: String,
    },
    NodeStarted {
        project: String,
        node: String,
        kind: ResourceKind,
    },
    NodeResolved {
        project: String,
        node: String,
        duration_seconds: f64,
        outputs_hash: String,
    },
    NodeFailed {
        project: String,
        node: String,
        error: String,
    },
    ApplyCompleted {
        project: String,
        run_id: String,
        nodes_provisioned: u32,
        nodes_unchanged: u32,
        nodes_failed: u32,
        total_seconds: f64,
    },
    DestroyStarted {
        project: String,
        run_id: String,
    },
    NodeDestroyed {
        project: String,
        node: String,
        absent: bool,
    },
    DestroyCompleted {
        project: String,
        run_id: String,
        nodes_destroyed: u32,
        nodes_failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply / destroy results
// ============================================================================

/// A node whose outputs are available after the walk.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedNode {
    pub node: String,
    pub kind: ResourceKind,
    pub outputs: Outputs,
    /// Already resolved before this walk; no provisioning call was made
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// The node that stopped a walk and why.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    pub node: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: NodeError,
}

fn serialize_display<S: serde::Serializer>(err: &NodeError, ser: S) -> Result<S::Ok, S::Error> {
    ser.collect_str(err)
}

/// Outcome of one apply walk; serializable for logs and resume tooling.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub project: String,
    pub run_id: String,
    /// Resolved nodes in completion order, cached ones included
    pub resolved: Vec<ResolvedNode>,
    /// Empty on success; the sequential walk records at most one
    pub failures: Vec<ApplyFailure>,
    /// Nodes never started because the walk halted or was cancelled
    pub pending: Vec<String>,
    /// Exported values of every fully resolved stack
    pub exports: IndexMap<String, IndexMap<String, serde_json::Value>>,
    pub cancelled: bool,
    pub provisioned: u32,
    pub unchanged: u32,
    pub total_seconds: f64,
}

impl ApplyResult {
    /// The first failure, if any.
    pub fn failure(&self) -> Option<&ApplyFailure> {
        self.failures.first()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.pending.is_empty() && !self.cancelled
    }

    /// Resolved node ids in order.
    pub fn resolved_ids(&self) -> Vec<&str> {
        self.resolved.iter().map(|r| r.node.as_str()).collect()
    }
}

/// A node visited by destroy.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyedNode {
    pub node: String,
    /// The control plane reported the resource already gone
    pub absent: bool,
}

/// Outcome of one destroy walk.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyResult {
    pub project: String,
    pub run_id: String,
    pub destroyed: Vec<DestroyedNode>,
    pub failure: Option<ApplyFailure>,
    pub pending: Vec<String>,
    pub total_seconds: f64,
}

// ============================================================================
// Template helper
// ============================================================================

/// Render a JSON value as text for string-template substitution.
pub fn json_value_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
