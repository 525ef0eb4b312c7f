//! Core type definitions for centigpu
//!
//! A reduced model of the orchestrator objects the extender works with. The
//! watch plumbing that feeds these objects lives outside this workspace; here
//! they are plain data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::labels;

/// Unique identifier for a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodUid(String);

impl PodUid {
    /// Create a new PodUid from a string
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Generate a random PodUid
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation of the PodUid
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for PodUid {
    fn default() -> Self {
        Self(String::new())
    }
}

/// The two accounted GPU resource axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceAxis {
    /// Compute share, in core units (100 per card)
    Core,
    /// VRAM, in MiB
    Memory,
}

impl fmt::Display for ResourceAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAxis::Core => write!(f, "core"),
            ResourceAxis::Memory => write!(f, "memory"),
        }
    }
}

/// A single container and its resource requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container name
    pub name: String,

    /// Resource request key/value pairs, quantities as strings
    pub requests: HashMap<String, String>,
}

impl Container {
    /// Create a container with no resource requests
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: HashMap::new(),
        }
    }

    /// Set a resource request
    pub fn with_request(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requests.insert(key.into(), value.into());
        self
    }

    /// Set both GPU requests: core percentage and memory MiB
    pub fn with_gpu_request(self, core: u32, memory: u64) -> Self {
        self.with_request(labels::CORE_RESOURCE, core.to_string())
            .with_request(labels::MEMORY_RESOURCE, memory.to_string())
    }
}

/// A pod as seen through the cluster cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// Pod UID
    pub uid: PodUid,

    /// Pod name
    pub name: String,

    /// Pod namespace
    pub namespace: String,

    /// Node the pod is scheduled on, empty until bound
    pub node_name: Option<String>,

    /// Object labels
    pub labels: HashMap<String, String>,

    /// Object annotations
    pub annotations: HashMap<String, String>,

    /// Containers in declaration order
    pub containers: Vec<Container>,

    /// Monotonic version used for optimistic-concurrency writes
    pub resource_version: u64,
}

impl Pod {
    /// Create a pod with a generated UID
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: PodUid::generate(),
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Namespace-qualified name for logging
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Whether this pod carries the assume label and is therefore managed by
    /// the extender
    pub fn is_assumed(&self) -> bool {
        self.labels
            .get(labels::ASSUME_LABEL)
            .is_some_and(|v| v == labels::ASSUME_VALUE)
    }

    /// The plan annotation value, if the pod has been bound
    pub fn plan_annotation(&self) -> Option<&str> {
        self.annotations.get(labels::PLAN_ANNOTATION).map(String::as_str)
    }

    /// Mark the pod as managed
    pub fn with_assume_label(mut self) -> Self {
        self.labels
            .insert(labels::ASSUME_LABEL.to_string(), labels::ASSUME_VALUE.to_string());
        self
    }

    /// Append a container
    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    /// Set the scheduled node
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    /// Set an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// A node as seen through the cluster cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node name
    pub name: String,

    /// Object labels, carrying the GPU capacity contract
    pub labels: HashMap<String, String>,
}

impl Node {
    /// Create a node with no labels
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: HashMap::new(),
        }
    }

    /// Set the GPU capacity labels: card count, core units per card, memory
    /// MiB per card
    pub fn with_gpu_capacity(mut self, count: usize, core_per_card: u32, memory_per_card: u64) -> Self {
        self.labels
            .insert(labels::GPU_COUNT_LABEL.to_string(), count.to_string());
        self.labels
            .insert(labels::CORE_PER_CARD_LABEL.to_string(), core_per_card.to_string());
        self.labels
            .insert(labels::MEMORY_PER_CARD_LABEL.to_string(), memory_per_card.to_string());
        self
    }
}
