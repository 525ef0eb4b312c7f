//! Scheduler-extender wire contract
//!
//! The cluster scheduler posts JSON with PascalCase field names; pod objects
//! inside it follow the orchestrator's own shape (lowercase `metadata` /
//! `spec`). Only the fields the dealer needs are modelled; everything else
//! passes through untouched on the scheduler's side.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use centigpu_core::{Container, Pod, PodUid};

/// Arguments of a filter or prioritize call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtenderArgs {
    #[serde(rename = "Pod")]
    pub pod: WirePod,

    #[serde(rename = "NodeNames")]
    pub node_names: Option<Vec<String>>,
}

/// Result of a filter call: the nodes that can host the pod, and a reason
/// per rejected node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderFilterResult {
    #[serde(rename = "NodeNames")]
    pub node_names: Option<Vec<String>>,

    #[serde(rename = "FailedNodes")]
    pub failed_nodes: HashMap<String, String>,

    #[serde(rename = "Error")]
    pub error: String,
}

/// One entry of a prioritize result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    #[serde(rename = "Host")]
    pub host: String,

    #[serde(rename = "Score")]
    pub score: i64,
}

/// Arguments of a bind call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtenderBindingArgs {
    #[serde(rename = "PodName")]
    pub pod_name: String,

    #[serde(rename = "PodNamespace")]
    pub pod_namespace: String,

    #[serde(rename = "PodUID")]
    pub pod_uid: String,

    #[serde(rename = "Node")]
    pub node: String,
}

/// Result of a bind call; empty error means success
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtenderBindingResult {
    #[serde(rename = "Error")]
    pub error: Option<String>,
}

/// Pod as it appears on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WirePod {
    #[serde(default)]
    pub metadata: WireMeta,

    #[serde(default)]
    pub spec: WireSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default, rename = "resourceVersion")]
    pub resource_version: String,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireSpec {
    #[serde(default, rename = "nodeName")]
    pub node_name: Option<String>,

    #[serde(default)]
    pub containers: Vec<WireContainer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireContainer {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub resources: WireResources,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireResources {
    #[serde(default)]
    pub requests: HashMap<String, String>,
}

impl From<WirePod> for Pod {
    fn from(wire: WirePod) -> Self {
        Pod {
            uid: PodUid::new(wire.metadata.uid),
            name: wire.metadata.name,
            namespace: wire.metadata.namespace,
            node_name: wire.spec.node_name.filter(|n| !n.is_empty()),
            labels: wire.metadata.labels,
            annotations: wire.metadata.annotations,
            containers: wire
                .spec
                .containers
                .into_iter()
                .map(|c| Container {
                    name: c.name,
                    requests: c.resources.requests,
                })
                .collect(),
            resource_version: wire.metadata.resource_version.parse().unwrap_or(0),
        }
    }
}
