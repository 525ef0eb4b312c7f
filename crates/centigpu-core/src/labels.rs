//! The pod/node contract: label keys, annotation keys, and resource names
//!
//! Pods opt in with the assume label; their containers request fractional GPU
//! capacity through the two resource keys; the chosen card indices are written
//! back under the plan annotation at bind time. Node capacity is read from
//! node labels.

use crate::error::{Error, Result};
use crate::types::Node;

/// Label marking a pod as managed by this extender
pub const ASSUME_LABEL: &str = "centigpu.io/assume";

/// Value the assume label must carry
pub const ASSUME_VALUE: &str = "true";

/// Annotation holding the comma-separated GPU indices chosen at bind time,
/// one per GPU-bearing container in container order
pub const PLAN_ANNOTATION: &str = "centigpu.io/plan";

/// Per-container compute request, integer percent of one card (1..=100)
pub const CORE_RESOURCE: &str = "centigpu.io/core";

/// Per-container memory request in MiB
pub const MEMORY_RESOURCE: &str = "centigpu.io/memory";

/// Node label: number of cards on the node
pub const GPU_COUNT_LABEL: &str = "centigpu.io/gpu-count";

/// Node label: core units per card (normalised to 100)
pub const CORE_PER_CARD_LABEL: &str = "centigpu.io/core-per-card";

/// Node label: memory MiB per card
pub const MEMORY_PER_CARD_LABEL: &str = "centigpu.io/memory-per-card";

/// Core units one card is normalised to
pub const CORE_UNITS_PER_CARD: u32 = 100;

/// GPU capacity advertised by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacity {
    pub gpu_count: usize,
    pub core_per_card: u32,
    pub memory_per_card: u64,
}

/// Read the GPU capacity contract off a node's labels
pub fn node_capacity(node: &Node) -> Result<NodeCapacity> {
    let gpu_count: usize = parse_label(node, GPU_COUNT_LABEL)?;
    if gpu_count == 0 {
        return Err(Error::config(format!(
            "node {} advertises zero GPUs",
            node.name
        )));
    }
    let core_per_card: u32 = parse_label(node, CORE_PER_CARD_LABEL)?;
    let memory_per_card: u64 = parse_label(node, MEMORY_PER_CARD_LABEL)?;
    if core_per_card == 0 || memory_per_card == 0 {
        return Err(Error::config(format!(
            "node {} advertises zero per-card capacity",
            node.name
        )));
    }
    Ok(NodeCapacity {
        gpu_count,
        core_per_card,
        memory_per_card,
    })
}

fn parse_label<T: std::str::FromStr>(node: &Node, key: &str) -> Result<T> {
    let raw = node
        .labels
        .get(key)
        .ok_or_else(|| Error::config(format!("node {} is missing label {}", node.name, key)))?;
    raw.parse().map_err(|_| {
        Error::config(format!(
            "node {} label {} has unparseable value {:?}",
            node.name, key, raw
        ))
    })
}
