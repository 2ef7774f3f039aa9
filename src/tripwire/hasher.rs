//! AN-010: BLAKE3 hashing of declared configuration and provisioned outputs.

use crate::core::model::ResourceNode;
use crate::core::types::Outputs;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Hash of a node's declared state: kind, configuration (references kept
/// symbolic) and explicit dependencies. Key order is declaration order.
pub fn hash_node(node: &ResourceNode) -> String {
    let config = serde_json::to_string(&node.config).unwrap_or_default();
    let kind = node.kind.to_string();
    let deps = node.depends_on.join(",");
    composite_hash(&[&kind, &config, &deps])
}

/// Hash of a provisioned attribute map.
pub fn hash_outputs(outputs: &Outputs) -> String {
    hash_string(&serde_json::to_string(outputs).unwrap_or_default())
}

/// First `len` hex characters of the BLAKE3 digest of `seed`.
pub fn short_hex(seed: &str, len: usize) -> String {
    let hex = blake3::hash(seed.as_bytes()).to_hex();
    hex[..len.min(hex.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{config, Stack};
    use crate::core::types::{ConfigValue, ResourceKind};

    #[test]
    fn test_an010_hash_string() {
        let h1 = hash_string("hello");
        let h2 = hash_string("hello");
        let h3 = hash_string("world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64);
    }

    #[test]
    fn test_an010_composite_hash_order_sensitive() {
        let h = composite_hash(&["a", "b"]);
        assert_ne!(h, composite_hash(&["b", "a"]));
        // Separator keeps ("ab", "") distinct from ("a", "b")
        assert_ne!(composite_hash(&["ab", ""]), h);
    }

    #[test]
    fn test_an010_hash_node_tracks_config() {
        let mut s = Stack::new("s");
        s.define_node("db", ResourceKind::DatabaseInstance, config([("engine", "mysql")]))
            .unwrap();
        s.define_node("db2", ResourceKind::DatabaseInstance, config([("engine", "aurora-mysql")]))
            .unwrap();
        s.define_node("db3", ResourceKind::DatabaseInstance, config([("engine", "mysql")]))
            .unwrap()
            .depends_on("db");
        let nodes = s.nodes();
        assert_ne!(hash_node(&nodes[0]), hash_node(&nodes[1]));
        assert_ne!(hash_node(&nodes[0]), hash_node(&nodes[2]));
    }

    #[test]
    fn test_an010_hash_node_ignores_id() {
        let mut s = Stack::new("s");
        let cfg = config([("subnets", ConfigValue::reference("vpc", "privateSubnetIds"))]);
        s.define_node("a", ResourceKind::Cluster, cfg.clone()).unwrap();
        s.define_node("b", ResourceKind::Cluster, cfg).unwrap();
        assert_eq!(hash_node(&s.nodes()[0]), hash_node(&s.nodes()[1]));
    }

    #[test]
    fn test_an010_short_hex() {
        let h = short_hex("base/vpc", 8);
        assert_eq!(h.len(), 8);
        assert_eq!(h, short_hex("base/vpc", 8));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(short_hex("x", 500).len(), 64);
    }

    #[test]
    fn test_an010_hash_outputs() {
        let mut a = Outputs::new();
        a.insert("vpcId".to_string(), serde_json::json!("vpc-1"));
        let mut b = Outputs::new();
        b.insert("vpcId".to_string(), serde_json::json!("vpc-2"));
        assert_ne!(hash_outputs(&a), hash_outputs(&b));
    }
}
