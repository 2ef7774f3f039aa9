//! Andamio: declarative resource graphs, provisioned in dependency order.
//!
//! Stacks of typed resource nodes reference each other's future outputs.
//! The graph is checked for cycles up front, then walked in topological
//! order against a pluggable control plane. BLAKE3 state lock, JSONL
//! provenance log.

pub mod cli;
pub mod core;
pub mod provider;
pub mod tripwire;
