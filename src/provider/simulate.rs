//! AN-021: Simulated control plane.
//!
//! Synthesizes the attributes a real cloud would return for each kind, so a
//! topology can be planned, applied and torn down end to end without
//! credentials. Identifiers are derived from the node's qualified id, so they
//! stay stable across re-provisioning.

use super::Provisioner;
use crate::core::error::ProvisionError;
use crate::core::model::ResourceNode;
use crate::core::types::{Outputs, ResolvedConfig, ResourceKind};
use crate::tripwire::hasher::short_hex;
use serde_json::{json, Value};

const REGION: &str = "sim-1";
const ACCOUNT: &str = "000000000000";

/// Deterministic in-process control plane.
#[derive(Debug, Clone, Default)]
pub struct SimulatedCloud;

impl SimulatedCloud {
    pub fn new() -> Self {
        Self
    }
}

fn config_str<'a>(config: &'a ResolvedConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

fn config_u64(config: &ResolvedConfig, key: &str) -> Option<u64> {
    config.get(key).and_then(Value::as_u64)
}

fn default_port(engine: &str) -> u64 {
    if engine.contains("postgres") {
        5432
    } else {
        3306
    }
}

fn outputs(pairs: Vec<(&str, Value)>) -> Outputs {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl Provisioner for SimulatedCloud {
    fn provision(&self, node: &ResourceNode, config: &ResolvedConfig) -> Result<Outputs, ProvisionError> {
        let qid = node.qualified_id();
        let id = node.id();
        let hex = |salt: &str, len: usize| short_hex(&format!("{}#{}", qid, salt), len);

        let out = match node.kind {
            ResourceKind::Network => {
                let azs = config_u64(config, "max_azs").unwrap_or(2);
                let zones: Vec<String> = (0..azs)
                    .map(|i| format!("{}{}", REGION, (b'a' + (i % 26) as u8) as char))
                    .collect();
                let private: Vec<String> = (0..azs)
                    .map(|i| format!("subnet-{}", hex(&format!("private{}", i), 8)))
                    .collect();
                let public: Vec<String> = (0..azs)
                    .map(|i| format!("subnet-{}", hex(&format!("public{}", i), 8)))
                    .collect();
                outputs(vec![
                    ("vpcId", json!(format!("vpc-{}", hex("vpc", 8)))),
                    ("availabilityZones", json!(zones)),
                    ("privateSubnetIds", json!(private)),
                    ("publicSubnetIds", json!(public)),
                ])
            }
            ResourceKind::Cluster => {
                let name = config_str(config, "cluster_name").unwrap_or(id);
                outputs(vec![
                    ("clusterName", json!(name)),
                    (
                        "clusterArn",
                        json!(format!("arn:aws:ecs:{}:{}:cluster/{}", REGION, ACCOUNT, name)),
                    ),
                ])
            }
            ResourceKind::Secret => {
                let name = config_str(config, "secret_name").unwrap_or(id);
                outputs(vec![
                    ("secretName", json!(name)),
                    (
                        "secretArn",
                        json!(format!(
                            "arn:aws:secretsmanager:{}:{}:secret:{}-{}",
                            REGION,
                            ACCOUNT,
                            name,
                            hex("secret", 6)
                        )),
                    ),
                ])
            }
            ResourceKind::SecurityGroup => outputs(vec![(
                "securityGroupId",
                json!(format!("sg-{}", hex("sg", 12))),
            )]),
            ResourceKind::DatabaseInstance => {
                let identifier = config_str(config, "identifier").unwrap_or(id);
                let engine = config_str(config, "engine").unwrap_or("mysql");
                let port = config_u64(config, "port").unwrap_or_else(|| default_port(engine));
                outputs(vec![
                    (
                        "endpointAddress",
                        json!(format!(
                            "{}.{}.{}.rds.internal",
                            identifier,
                            hex("db", 12),
                            REGION
                        )),
                    ),
                    ("endpointPort", json!(port)),
                    ("engine", json!(engine)),
                ])
            }
            ResourceKind::LoadBalancedService => {
                let service = config_str(config, "service_name").unwrap_or(id);
                outputs(vec![
                    ("serviceName", json!(service)),
                    (
                        "serviceArn",
                        json!(format!("arn:aws:ecs:{}:{}:service/{}", REGION, ACCOUNT, service)),
                    ),
                    (
                        "loadBalancerDnsName",
                        json!(format!(
                            "{}-{}.{}.elb.internal",
                            node.stack(),
                            hex("alb-dns", 8),
                            REGION
                        )),
                    ),
                    (
                        "loadBalancerFullName",
                        json!(format!("app/{}/{}", id, hex("alb", 16))),
                    ),
                    (
                        "targetGroupFullName",
                        json!(format!("targetgroup/{}/{}", id, hex("tg", 16))),
                    ),
                ])
            }
            ResourceKind::ScalingPolicy => {
                let name = config_str(config, "policy_name").unwrap_or(id);
                outputs(vec![
                    ("policyName", json!(name)),
                    (
                        "policyArn",
                        json!(format!(
                            "arn:aws:autoscaling:{}:{}:scalingPolicy:{}",
                            REGION,
                            ACCOUNT,
                            hex("policy", 12)
                        )),
                    ),
                ])
            }
            ResourceKind::Dashboard => {
                let name = config_str(config, "dashboard_name")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}-{}", node.stack(), id));
                outputs(vec![
                    (
                        "dashboardArn",
                        json!(format!("arn:aws:cloudwatch::{}:dashboard/{}", ACCOUNT, name)),
                    ),
                    ("dashboardName", json!(name)),
                ])
            }
        };
        Ok(out)
    }

    fn destroy(&self, _node: &ResourceNode, outputs: Option<&Outputs>) -> Result<(), ProvisionError> {
        match outputs {
            Some(_) => Ok(()),
            None => Err(ProvisionError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Stack;
    use indexmap::IndexMap;

    fn node(kind: ResourceKind, id: &str) -> ResourceNode {
        let mut s = Stack::new("demo");
        s.define_node(id, kind, IndexMap::new()).unwrap();
        s.nodes()[0].clone()
    }

    #[test]
    fn test_an021_network_subnets_follow_max_azs() {
        let mut cfg = ResolvedConfig::new();
        cfg.insert("max_azs".to_string(), json!(3));
        let out = SimulatedCloud::new()
            .provision(&node(ResourceKind::Network, "vpc"), &cfg)
            .unwrap();
        assert_eq!(out["privateSubnetIds"].as_array().unwrap().len(), 3);
        assert_eq!(out["availabilityZones"], json!(["sim-1a", "sim-1b", "sim-1c"]));
        assert!(out["vpcId"].as_str().unwrap().starts_with("vpc-"));
    }

    #[test]
    fn test_an021_deterministic() {
        let p = SimulatedCloud::new();
        let n = node(ResourceKind::DatabaseInstance, "db");
        let a = p.provision(&n, &ResolvedConfig::new()).unwrap();
        let b = p.provision(&n, &ResolvedConfig::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_an021_database_port_by_engine() {
        let p = SimulatedCloud::new();
        let n = node(ResourceKind::DatabaseInstance, "db");
        let mut cfg = ResolvedConfig::new();
        cfg.insert("engine".to_string(), json!("postgres"));
        assert_eq!(p.provision(&n, &cfg).unwrap()["endpointPort"], json!(5432));
        cfg.insert("engine".to_string(), json!("aurora-mysql"));
        assert_eq!(p.provision(&n, &cfg).unwrap()["endpointPort"], json!(3306));
        cfg.insert("port".to_string(), json!(6000));
        assert_eq!(p.provision(&n, &cfg).unwrap()["endpointPort"], json!(6000));
    }

    #[test]
    fn test_an021_every_kind_produces_outputs() {
        let p = SimulatedCloud::new();
        for kind in [
            ResourceKind::Network,
            ResourceKind::Cluster,
            ResourceKind::Secret,
            ResourceKind::SecurityGroup,
            ResourceKind::DatabaseInstance,
            ResourceKind::LoadBalancedService,
            ResourceKind::ScalingPolicy,
            ResourceKind::Dashboard,
        ] {
            let out = p.provision(&node(kind, "x"), &ResolvedConfig::new()).unwrap();
            assert!(!out.is_empty(), "{} produced no outputs", kind);
        }
    }

    #[test]
    fn test_an021_destroy_absent() {
        let p = SimulatedCloud::new();
        let n = node(ResourceKind::Secret, "s");
        assert_eq!(p.destroy(&n, None), Err(ProvisionError::NotFound));
        assert_eq!(p.destroy(&n, Some(&Outputs::new())), Ok(()));
    }
}
