//! Recording control plane for tests.

use super::Provisioner;
use crate::core::error::ProvisionError;
use crate::core::model::ResourceNode;
use crate::core::types::{Outputs, ResolvedConfig};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    End(String),
    Destroy(String),
}

/// Records every call; outputs echo the node id and resolved config.
#[derive(Default)]
pub struct Recorder {
    pub calls: Mutex<Vec<Call>>,
    pub configs: Mutex<Vec<(String, ResolvedConfig)>>,
    pub destroy_outputs: Mutex<Vec<(String, Option<Outputs>)>>,
    pub fail_on: Mutex<HashSet<String>>,
    pub absent_on_destroy: HashSet<String>,
    pub delay: Option<Duration>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ids: &[&str]) -> Self {
        let r = Self::new();
        r.fail_on
            .lock()
            .unwrap()
            .extend(ids.iter().map(|s| s.to_string()));
        r
    }

    /// Report these nodes as already gone on destroy, even when outputs exist.
    pub fn absent_on_destroy(mut self, ids: &[&str]) -> Self {
        self.absent_on_destroy
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn heal(&self, id: &str) {
        self.fail_on.lock().unwrap().remove(id);
    }

    /// Ids passed to `provision`, in call order.
    pub fn provisioned(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Start(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Destroy(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Outputs handed to the last destroy call for `id`.
    pub fn destroyed_outputs(&self, id: &str) -> Option<Outputs> {
        self.destroy_outputs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == id)
            .and_then(|(_, o)| o.clone())
    }

    pub fn config_of(&self, id: &str) -> Option<ResolvedConfig> {
        self.configs
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == id)
            .map(|(_, c)| c.clone())
    }
}

impl Provisioner for Recorder {
    fn provision(&self, node: &ResourceNode, config: &ResolvedConfig) -> Result<Outputs, ProvisionError> {
        let id = node.qualified_id();
        self.calls.lock().unwrap().push(Call::Start(id.clone()));
        self.configs
            .lock()
            .unwrap()
            .push((id.clone(), config.clone()));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let fail = self.fail_on.lock().unwrap().contains(&id);
        self.calls.lock().unwrap().push(Call::End(id.clone()));
        if fail {
            return Err(ProvisionError::failed(format!("{} rejected", id)));
        }
        let mut out = Outputs::new();
        out.insert("id".to_string(), serde_json::json!(id));
        out.insert(
            "endpointAddress".to_string(),
            serde_json::json!(format!("{}.example.internal", node.id())),
        );
        Ok(out)
    }

    fn destroy(&self, node: &ResourceNode, outputs: Option<&Outputs>) -> Result<(), ProvisionError> {
        let id = node.qualified_id();
        self.calls.lock().unwrap().push(Call::Destroy(id.clone()));
        self.destroy_outputs
            .lock()
            .unwrap()
            .push((id.clone(), outputs.cloned()));
        if self.fail_on.lock().unwrap().contains(&id) {
            return Err(ProvisionError::failed(format!("{} stuck", id)));
        }
        if outputs.is_none() || self.absent_on_destroy.contains(&id) {
            return Err(ProvisionError::NotFound);
        }
        Ok(())
    }
}
