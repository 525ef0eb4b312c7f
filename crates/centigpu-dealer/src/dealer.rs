//! The dealer: process-wide placement orchestration
//!
//! One async mutex serialises every operation over the node inventory, the
//! committed-pod map, and the released tombstones. Node state is built
//! lazily: the first reference to a node reads its capacity labels and
//! replays every assumed pod already scheduled there. Within one assume
//! call, per-node fit work fans out over a small worker pool; each node is
//! handled by exactly one worker, so workers never contend.
//!
//! Lock order is always dealer state first, usage cache second.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use centigpu_core::{
    labels, ClusterProvider, Demand, Error, PlacementPolicy, Plan, Pod, PodUid, ResourceAxis,
    Result,
};

use crate::node::{NodeInfo, NodeSnapshot};
use crate::rater::{self, Rater, SCORE_MIN};
use crate::usage::UsageCache;

/// Workers fanning out per-node fit work inside one assume call
pub const ASSUME_WORKERS: usize = 4;

#[derive(Default)]
struct DealerState {
    /// Authoritative in-memory inventory, name to node
    nodes: HashMap<String, NodeInfo>,
    /// Last-seen pod object for every pod with committed resources
    pods: HashMap<PodUid, Pod>,
    /// Pods whose resources were returned but not yet forgotten
    released: HashSet<PodUid>,
}

/// Process-wide registry of nodes and known pods
pub struct Dealer {
    cluster: Arc<dyn ClusterProvider>,
    usage: Arc<UsageCache>,
    /// Samples older than this never weigh into scoring
    active_duration: Duration,
    state: Mutex<DealerState>,
}

impl Dealer {
    /// Build the dealer and seed node state from every assumed pod already
    /// scheduled in the cluster. Individual seed failures are logged and
    /// skipped; only listing failures abort startup.
    pub async fn new(
        cluster: Arc<dyn ClusterProvider>,
        usage: Arc<UsageCache>,
        active_duration: Duration,
    ) -> Result<Self> {
        let dealer = Self {
            cluster,
            usage,
            active_duration,
            state: Mutex::new(DealerState::default()),
        };
        let pods = centigpu_core::cluster::scheduled_assumed_pods(dealer.cluster.as_ref()).await?;
        {
            let mut state = dealer.state.lock().await;
            for pod in pods {
                let Some(node) = pod.node_name.clone() else {
                    continue;
                };
                if let Err(e) =
                    Self::resolve_node(dealer.cluster.as_ref(), &mut state, &node).await
                {
                    warn!("startup seed of node {} failed: {}", node, e);
                }
            }
            info!("dealer started with {} seeded nodes", state.nodes.len());
        }
        Ok(dealer)
    }

    /// The usage cache backing load-aware scoring
    pub fn usage(&self) -> Arc<UsageCache> {
        self.usage.clone()
    }

    /// Tentatively place a pod on every candidate node. Returns one
    /// (passed, reason) cell per node; failures never abort the whole call.
    pub async fn assume(
        &self,
        nodes: &[String],
        pod: &Pod,
        policy: PlacementPolicy,
    ) -> (Vec<bool>, Vec<Option<Error>>) {
        let mut ans = vec![false; nodes.len()];
        let mut errs: Vec<Option<Error>> = nodes.iter().map(|_| None).collect();

        let demand = match Demand::from_pod(pod) {
            Ok(d) => d,
            Err(e) => {
                let (pod_name, reason) = match &e {
                    Error::MalformedPod { pod, reason } => (pod.clone(), reason.clone()),
                    other => (pod.full_name(), other.to_string()),
                };
                for cell in errs.iter_mut() {
                    *cell = Some(Error::malformed_pod(pod_name.clone(), reason.clone()));
                }
                return (ans, errs);
            }
        };
        if demand.is_empty() {
            // Not a GPU pod; any node can host it as far as we care.
            ans.fill(true);
            return (ans, errs);
        }

        let rater = Rater::new(policy);
        let mut state = self.state.lock().await;

        let mut targets: HashMap<String, usize> = HashMap::new();
        for (i, name) in nodes.iter().enumerate() {
            match Self::resolve_node(self.cluster.as_ref(), &mut state, name).await {
                Ok(_) => {
                    targets.insert(name.clone(), i);
                }
                Err(e) => errs[i] = Some(e),
            }
        }

        let work: Vec<(usize, &mut NodeInfo)> = state
            .nodes
            .iter_mut()
            .filter_map(|(name, ni)| targets.get(name).map(|&i| (i, ni)))
            .collect();
        for (slot, result) in run_assume_pool(work, &demand, &rater) {
            match result {
                Ok(()) => ans[slot] = true,
                Err(e) => errs[slot] = Some(e),
            }
        }
        debug!(
            "assume {} over {} nodes: {} passed",
            pod.full_name(),
            nodes.len(),
            ans.iter().filter(|&&a| a).count()
        );
        (ans, errs)
    }

    /// Rank every candidate node for a pod. Unknown nodes and unfittable
    /// demands rank lowest; load weighting applies only when requested.
    pub async fn score(
        &self,
        nodes: &[String],
        pod: &Pod,
        policy: PlacementPolicy,
        load_aware: bool,
    ) -> Vec<i64> {
        let demand = match Demand::from_pod(pod) {
            Ok(d) if !d.is_empty() => d,
            _ => return vec![SCORE_MIN; nodes.len()],
        };
        let rater = Rater::new(policy);
        let mut state = self.state.lock().await;
        let mut scores = Vec::with_capacity(nodes.len());
        for name in nodes {
            match Self::resolve_node(self.cluster.as_ref(), &mut state, name).await {
                Ok(ni) => {
                    let factor = if load_aware {
                        rater::load_factor(&self.usage, name, ni.cards().len(), self.active_duration)
                    } else {
                        1.0
                    };
                    scores.push(ni.score(&demand, &rater, factor));
                }
                Err(e) => {
                    warn!("score: node {} unavailable: {}", name, e);
                    scores.push(SCORE_MIN);
                }
            }
        }
        scores
    }

    /// Promote the pod's placement on the chosen node: write the plan
    /// annotation (retrying a stale-object conflict exactly once), create
    /// the binding, and remember the pod. Any terminal write failure
    /// releases the node-side commitments again before it is surfaced.
    pub async fn bind(&self, node: &str, pod: &Pod, policy: PlacementPolicy) -> Result<()> {
        let demand = Demand::from_pod(pod)?;
        if demand.is_empty() {
            return Err(Error::malformed_pod(pod.full_name(), "no GPU containers to bind"));
        }
        let rater = Rater::new(policy);
        let mut state = self.state.lock().await;

        let plan = {
            let ni = Self::resolve_node(self.cluster.as_ref(), &mut state, node).await?;
            ni.bind(&demand, &rater)?
        };

        let mut updated = match self.write_plan(pod, &plan).await {
            Ok(p) => p,
            Err(e) => {
                Self::rollback(&mut state, node, &plan);
                return Err(e);
            }
        };

        if let Err(e) = self.cluster.bind_pod(&updated, node).await {
            Self::rollback(&mut state, node, &plan);
            return Err(Error::bind_io(format!(
                "bind pod {} to {}: {}",
                pod.full_name(),
                node,
                e
            )));
        }
        updated.node_name = Some(node.to_string());

        state.released.remove(&updated.uid);
        state.pods.insert(updated.uid.clone(), updated);
        info!("bound {} to {} on cards {:?}", pod.full_name(), node, plan.indices());
        Ok(())
    }

    /// Admit an already-bound pod into the accounting. Idempotent by UID.
    pub async fn allocate(&self, pod: &Pod) -> Result<()> {
        let Some(node) = pod.node_name.clone() else {
            return Err(Error::malformed_pod(pod.full_name(), "node name is empty"));
        };
        let mut state = self.state.lock().await;
        Self::resolve_node(self.cluster.as_ref(), &mut state, &node).await?;
        if state.pods.contains_key(&pod.uid) {
            return Ok(());
        }
        let plan = Plan::from_pod(pod)?;
        let ni = state
            .nodes
            .get_mut(&node)
            .ok_or_else(|| Error::node_unknown(&node))?;
        ni.allocate(&plan)?;
        state.pods.insert(pod.uid.clone(), pod.clone());
        Ok(())
    }

    /// Return a terminating pod's resources and leave a tombstone so a late
    /// duplicate release stays a no-op. Unknown pods are ignored.
    pub async fn release(&self, pod: &Pod) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.pods.get(&pod.uid).cloned() else {
            debug!("release of unknown pod {}, ignoring", pod.full_name());
            return Ok(());
        };
        let Some(node) = stored.node_name.clone() else {
            return Err(Error::malformed_pod(stored.full_name(), "node name is empty"));
        };
        let plan = Plan::from_pod(&stored)?;
        let ni = state
            .nodes
            .get_mut(&node)
            .ok_or_else(|| Error::node_unknown(&node))?;
        ni.release(&plan)?;
        state.pods.remove(&pod.uid);
        state.released.insert(pod.uid.clone());
        info!("released {} from {}", pod.full_name(), node);
        Ok(())
    }

    /// Drop all memory of a pod. Idempotent, never fails.
    pub async fn forget(&self, pod: &Pod) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pods.remove(&pod.uid);
        state.released.remove(&pod.uid);
        Ok(())
    }

    /// Whether the pod currently holds committed resources
    pub async fn known_pod(&self, pod: &Pod) -> bool {
        self.state.lock().await.pods.contains_key(&pod.uid)
    }

    /// Whether the pod's resources were returned but it is not yet forgotten
    pub async fn pod_released(&self, pod: &Pod) -> bool {
        self.state.lock().await.released.contains(&pod.uid)
    }

    /// Deep snapshot of the inventory for diagnostics, with the last
    /// observed utilisation per card attached; not subject to ongoing
    /// mutation
    pub async fn status(&self) -> HashMap<String, NodeSnapshot> {
        self.state
            .lock()
            .await
            .nodes
            .iter()
            .map(|(name, ni)| {
                let mut snapshot = ni.snapshot();
                snapshot.core_usage = self.usage_values(name, ResourceAxis::Core);
                snapshot.memory_usage = self.usage_values(name, ResourceAxis::Memory);
                (name.clone(), snapshot)
            })
            .collect()
    }

    fn usage_values(&self, node: &str, axis: ResourceAxis) -> HashMap<usize, f64> {
        self.usage
            .node_usage(node, axis)
            .into_iter()
            .map(|(card, sample)| (card, sample.value))
            .collect()
    }

    /// Trace the per-node commitments after a lifecycle action
    pub async fn log_status(&self, action: &str, pod: &Pod) {
        let state = self.state.lock().await;
        debug!("resource status after {} for {}:", action, pod.full_name());
        for (name, ni) in &state.nodes {
            debug!("  node {}: {:?}", name, ni.cards());
        }
    }

    /// Write the plan annotation, recovering from one stale-object conflict
    /// by re-fetching and re-applying. Returns the updated pod.
    async fn write_plan(&self, pod: &Pod, plan: &Plan) -> Result<Pod> {
        let value = plan.annotation_value();
        match self
            .cluster
            .update_pod_annotation(pod, labels::PLAN_ANNOTATION, &value)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if e.is_conflict() => {
                debug!("plan write for {} conflicted, retrying once", pod.full_name());
                let fresh = self
                    .cluster
                    .get_pod(&pod.namespace, &pod.name)
                    .await
                    .map_err(|e| {
                        Error::bind_io(format!("refetch pod {}: {}", pod.full_name(), e))
                    })?;
                let updated = self
                    .cluster
                    .update_pod_annotation(&fresh, labels::PLAN_ANNOTATION, &value)
                    .await
                    .map_err(|e| {
                        Error::bind_io(format!(
                            "write plan for {} after conflict: {}",
                            pod.full_name(),
                            e
                        ))
                    })?;
                Ok(updated)
            }
            Err(e) => Err(Error::bind_io(format!(
                "write plan for {}: {}",
                pod.full_name(),
                e
            ))),
        }
    }

    fn rollback(state: &mut DealerState, node: &str, plan: &Plan) {
        if let Some(ni) = state.nodes.get_mut(node) {
            if let Err(e) = ni.release(plan) {
                warn!("rollback on {} failed: {}", node, e);
            }
        }
    }

    /// Fetch or lazily seed a node. Seeding reads the capacity labels and
    /// replays every assumed pod scheduled on the node; per-pod replay
    /// failures are logged and skipped.
    async fn resolve_node<'a>(
        cluster: &dyn ClusterProvider,
        state: &'a mut DealerState,
        name: &str,
    ) -> Result<&'a mut NodeInfo> {
        if !state.nodes.contains_key(name) {
            let node = cluster.get_node(name).await?;
            let mut ni = NodeInfo::from_node(&node)?;
            let pods = cluster.assumed_pods_on_node(name).await?;
            let mut replayed = 0usize;
            for pod in pods {
                if state.pods.contains_key(&pod.uid) {
                    continue;
                }
                let plan = match Plan::from_pod(&pod) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("seed of {} skipped: {}", pod.full_name(), e);
                        continue;
                    }
                };
                if let Err(e) = ni.allocate(&plan) {
                    warn!("seed of {} skipped: {}", pod.full_name(), e);
                    continue;
                }
                state.pods.insert(pod.uid.clone(), pod);
                replayed += 1;
            }
            info!(
                "seeded node {} with {} cards, {} replayed pods",
                name,
                ni.cards().len(),
                replayed
            );
            state.nodes.insert(name.to_string(), ni);
        }
        state
            .nodes
            .get_mut(name)
            .ok_or_else(|| Error::node_unknown(name))
    }
}

/// Run per-node assume work on a bounded pool of scoped workers consuming a
/// shared queue. Every node slot is owned by exactly one worker; the pool
/// joins before returning, so no work outlives the call.
fn run_assume_pool(
    work: Vec<(usize, &mut NodeInfo)>,
    demand: &Demand,
    rater: &Rater,
) -> Vec<(usize, Result<()>)> {
    if work.is_empty() {
        return Vec::new();
    }
    let workers = ASSUME_WORKERS.min(work.len());
    let queue = StdMutex::new(work);
    let results = StdMutex::new(Vec::new());
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let item = queue.lock().unwrap_or_else(|e| e.into_inner()).pop();
                let Some((slot, ni)) = item else {
                    break;
                };
                let outcome = ni.assume(demand, rater);
                results
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push((slot, outcome));
            });
        }
    });
    results.into_inner().unwrap_or_else(|e| e.into_inner())
}
