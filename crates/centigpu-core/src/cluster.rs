//! Cluster access seam
//!
//! The dealer talks to the orchestrator exclusively through the
//! `ClusterProvider` trait: cached reads of nodes and pods, plus the two
//! writes bind needs (plan annotation update, binding creation). The
//! annotation update carries optimistic-concurrency semantics; a stale
//! resource version fails with `Error::Conflict` and the caller may re-fetch
//! and retry.
//!
//! `CachedCluster` is the in-memory implementation backing both tests and the
//! running extender; the watch plumbing that mirrors cluster objects into it
//! lives outside this workspace and feeds it through the upsert/remove
//! methods.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{Node, Pod};

/// Read and write access to the cluster objects the dealer needs
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Fetch a node by name
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Fetch a pod by namespace and name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// All pods carrying the assume label
    async fn list_assumed_pods(&self) -> Result<Vec<Pod>>;

    /// Assumed pods currently scheduled on the given node
    async fn assumed_pods_on_node(&self, node: &str) -> Result<Vec<Pod>>;

    /// Write an annotation onto a pod and return the updated object.
    ///
    /// Fails with `Error::Conflict` when the caller's copy is stale.
    async fn update_pod_annotation(&self, pod: &Pod, key: &str, value: &str) -> Result<Pod>;

    /// Bind a pod to a node
    async fn bind_pod(&self, pod: &Pod, node: &str) -> Result<()>;
}

/// In-memory cluster cache, fed by the external watch layer
#[derive(Debug, Default)]
pub struct CachedCluster {
    nodes: RwLock<HashMap<String, Node>>,
    pods: RwLock<HashMap<String, Pod>>,
}

fn pod_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl CachedCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mirror a node add/update from the watch layer
    pub async fn upsert_node(&self, node: Node) {
        self.nodes.write().await.insert(node.name.clone(), node);
    }

    /// Mirror a node delete from the watch layer
    pub async fn remove_node(&self, name: &str) {
        self.nodes.write().await.remove(name);
    }

    /// Mirror a pod add/update from the watch layer
    pub async fn upsert_pod(&self, pod: Pod) {
        self.pods
            .write()
            .await
            .insert(pod_key(&pod.namespace, &pod.name), pod);
    }

    /// Mirror a pod delete from the watch layer
    pub async fn remove_pod(&self, namespace: &str, name: &str) {
        self.pods.write().await.remove(&pod_key(namespace, name));
    }
}

#[async_trait]
impl ClusterProvider for CachedCluster {
    async fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::node_unknown(name))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods
            .read()
            .await
            .get(&pod_key(namespace, name))
            .cloned()
            .ok_or_else(|| Error::network(format!("pod {namespace}/{name} not in cache")))
    }

    async fn list_assumed_pods(&self) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .read()
            .await
            .values()
            .filter(|p| p.is_assumed())
            .cloned()
            .collect())
    }

    async fn assumed_pods_on_node(&self, node: &str) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .read()
            .await
            .values()
            .filter(|p| p.is_assumed() && p.node_name.as_deref() == Some(node))
            .cloned()
            .collect())
    }

    async fn update_pod_annotation(&self, pod: &Pod, key: &str, value: &str) -> Result<Pod> {
        let mut pods = self.pods.write().await;
        let stored = pods
            .get_mut(&pod_key(&pod.namespace, &pod.name))
            .ok_or_else(|| Error::network(format!("pod {} not in cache", pod.full_name())))?;
        if stored.resource_version != pod.resource_version {
            return Err(Error::conflict(format!(
                "pod {} changed: have version {}, cache at {}",
                pod.full_name(),
                pod.resource_version,
                stored.resource_version
            )));
        }
        stored
            .annotations
            .insert(key.to_string(), value.to_string());
        stored.resource_version += 1;
        Ok(stored.clone())
    }

    async fn bind_pod(&self, pod: &Pod, node: &str) -> Result<()> {
        let mut pods = self.pods.write().await;
        let stored = pods
            .get_mut(&pod_key(&pod.namespace, &pod.name))
            .ok_or_else(|| Error::network(format!("pod {} not in cache", pod.full_name())))?;
        stored.node_name = Some(node.to_string());
        stored.resource_version += 1;
        Ok(())
    }
}

/// Assumed pods scheduled anywhere, grouped for startup seeding
pub async fn scheduled_assumed_pods(cluster: &dyn ClusterProvider) -> Result<Vec<Pod>> {
    Ok(cluster
        .list_assumed_pods()
        .await?
        .into_iter()
        .filter(|p| p.node_name.is_some())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels;
    use crate::types::Container;

    fn sample_pod(name: &str, node: Option<&str>) -> Pod {
        let mut pod = Pod::new("default", name)
            .with_assume_label()
            .with_container(Container::new("main").with_gpu_request(30, 4096));
        if let Some(n) = node {
            pod = pod.with_node(n);
        }
        pod
    }

    #[tokio::test]
    async fn test_get_node_unknown() {
        let cluster = CachedCluster::new();
        let err = cluster.get_node("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NodeUnknown(_)));
    }

    #[tokio::test]
    async fn test_assumed_pod_listing() {
        let cluster = CachedCluster::new();
        cluster.upsert_node(Node::new("n1").with_gpu_capacity(2, 100, 16384)).await;
        cluster.upsert_pod(sample_pod("a", Some("n1"))).await;
        cluster.upsert_pod(sample_pod("b", None)).await;
        cluster.upsert_pod(Pod::new("default", "plain")).await;

        assert_eq!(cluster.list_assumed_pods().await.unwrap().len(), 2);
        let on_node = cluster.assumed_pods_on_node("n1").await.unwrap();
        assert_eq!(on_node.len(), 1);
        assert_eq!(on_node[0].name, "a");

        let scheduled = scheduled_assumed_pods(cluster.as_ref()).await.unwrap();
        assert_eq!(scheduled.len(), 1);
    }

    #[tokio::test]
    async fn test_annotation_update_bumps_version() {
        let cluster = CachedCluster::new();
        let pod = sample_pod("a", Some("n1"));
        cluster.upsert_pod(pod.clone()).await;

        let updated = cluster
            .update_pod_annotation(&pod, labels::PLAN_ANNOTATION, "0")
            .await
            .unwrap();
        assert_eq!(updated.plan_annotation(), Some("0"));
        assert_eq!(updated.resource_version, pod.resource_version + 1);
    }

    #[tokio::test]
    async fn test_annotation_update_conflicts_on_stale_version() {
        let cluster = CachedCluster::new();
        let pod = sample_pod("a", Some("n1"));
        cluster.upsert_pod(pod.clone()).await;

        // Another writer moves the object forward.
        let mut newer = pod.clone();
        newer.resource_version += 1;
        cluster.upsert_pod(newer).await;

        let err = cluster
            .update_pod_annotation(&pod, labels::PLAN_ANNOTATION, "0")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_bind_records_node() {
        let cluster = CachedCluster::new();
        let pod = sample_pod("a", None);
        cluster.upsert_pod(pod.clone()).await;

        cluster.bind_pod(&pod, "n1").await.unwrap();
        let stored = cluster.get_pod("default", "a").await.unwrap();
        assert_eq!(stored.node_name.as_deref(), Some("n1"));
    }
}
