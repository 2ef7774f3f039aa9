//! AN-002: Error taxonomy for graph construction, resolution and provisioning.

use thiserror::Error;

/// Errors raised while building or resolving the dependency graph.
///
/// Build-time variants (duplicates, unknown targets, cycles) are reported
/// before any provisioning call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node id '{id}' in stack '{stack}'")]
    DuplicateId { stack: String, id: String },

    #[error("duplicate stack '{0}'")]
    DuplicateStack(String),

    #[error("stack '{stack}' takes input from unknown stack '{input}'")]
    UnknownStack { stack: String, input: String },

    #[error("node '{node}' references unknown node '{target}'")]
    UnknownReference { node: String, target: String },

    #[error("node '{node}' has malformed reference '{reference}'")]
    InvalidReference { node: String, reference: String },

    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    #[error("node '{node}' read '{target}.{attr}' before '{target}' was resolved")]
    AttributeNotReady {
        node: String,
        target: String,
        attr: String,
    },

    #[error("node '{node}' needs '{target}.{attr}' but '{target}' produced no such attribute")]
    MissingAttribute {
        node: String,
        target: String,
        attr: String,
    },

    #[error("node '{0}' is already resolved")]
    AlreadyResolved(String),
}

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

/// Errors reported by the provisioning control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("provisioning failed: {message}")]
    Failed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("resource not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid provider output: {0}")]
    InvalidOutput(String),
}

impl ProvisionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            message: message.into(),
        }
    }
}

/// Why a single node could not be resolved during a walk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error(transparent)]
    Resolve(#[from] GraphError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Errors reading or writing the state lock.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid lock file {path}: {message}")]
    Format { path: String, message: String },
}
