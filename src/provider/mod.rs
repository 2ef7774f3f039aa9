//! AN-020: Provisioning callback contract and built-in control planes.

pub mod script;
pub mod simulate;
#[cfg(test)]
pub(crate) mod testing;

use crate::core::error::ProvisionError;
use crate::core::model::ResourceNode;
use crate::core::types::{Outputs, ProviderConfig, ResolvedConfig};
use std::sync::Arc;

/// The external control plane, invoked once per node.
///
/// `provision` must be idempotent: create or update the resource described by
/// `config` and return its output attributes. `destroy` tears down; returning
/// `ProvisionError::NotFound` means the resource is already absent, which the
/// executor treats as success.
pub trait Provisioner: Send + Sync {
    fn provision(&self, node: &ResourceNode, config: &ResolvedConfig) -> Result<Outputs, ProvisionError>;

    fn destroy(&self, node: &ResourceNode, outputs: Option<&Outputs>) -> Result<(), ProvisionError>;
}

impl<P: Provisioner + ?Sized> Provisioner for Arc<P> {
    fn provision(&self, node: &ResourceNode, config: &ResolvedConfig) -> Result<Outputs, ProvisionError> {
        (**self).provision(node, config)
    }

    fn destroy(&self, node: &ResourceNode, outputs: Option<&Outputs>) -> Result<(), ProvisionError> {
        (**self).destroy(node, outputs)
    }
}

/// Instantiate the control plane named in the project file.
pub fn from_config(config: &ProviderConfig) -> Arc<dyn Provisioner> {
    match config {
        ProviderConfig::Simulate => Arc::new(simulate::SimulatedCloud::new()),
        ProviderConfig::Script { command } => Arc::new(script::ScriptProvisioner::new(command)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Stack;
    use crate::core::types::ResourceKind;
    use indexmap::IndexMap;

    #[test]
    fn test_an020_from_config_simulate() {
        let p = from_config(&ProviderConfig::Simulate);
        let mut s = Stack::new("base");
        s.define_node("vpc", ResourceKind::Network, IndexMap::new()).unwrap();
        let out = p.provision(&s.nodes()[0], &ResolvedConfig::new()).unwrap();
        assert!(out.contains_key("vpcId"));
    }

    #[test]
    fn test_an020_arc_forwards() {
        let p: Arc<dyn Provisioner> = Arc::new(simulate::SimulatedCloud::new());
        let wrapped = Arc::new(p);
        let mut s = Stack::new("base");
        s.define_node("vpc", ResourceKind::Network, IndexMap::new()).unwrap();
        assert_eq!(
            wrapped.destroy(&s.nodes()[0], None),
            Err(ProvisionError::NotFound)
        );
    }
}
