//! Per-node placement engine
//!
//! `NodeInfo` owns one node's cards and runs the fit algorithm: each
//! container of a demand is placed greedily on its preferred fitting card,
//! with commitments accumulating so later containers of the same pod see
//! earlier choices (two containers therefore never share a card unless it
//! genuinely fits both). Fitting runs on a scratch copy and only a fully
//! successful fit touches the real counters, so a failed assume leaves the
//! node exactly as it was.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use centigpu_core::{labels, ContainerRequest, Demand, Error, Node, Plan, PlanUnit, ResourceAxis, Result};

use crate::gpu::GpuCard;
use crate::rater::{Rater, SCORE_MIN};

/// The dealer's authoritative view of one node
#[derive(Debug, Clone)]
pub struct NodeInfo {
    name: String,
    cards: Vec<GpuCard>,
    /// Commitments of the pod most recently assumed here, pending bind
    tentative: Option<Plan>,
}

/// Deep copy of a node's commitments for diagnostics, plus the last
/// observed utilisation per card (empty until the dealer attaches it)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub cards: Vec<GpuCard>,
    /// Card index to last observed core utilisation percent
    pub core_usage: HashMap<usize, f64>,
    /// Card index to last observed memory utilisation percent
    pub memory_usage: HashMap<usize, f64>,
}

impl NodeInfo {
    /// A node with `count` identical fresh cards
    pub fn new(name: impl Into<String>, count: usize, core_per_card: u32, memory_per_card: u64) -> Self {
        Self {
            name: name.into(),
            cards: (0..count)
                .map(|i| GpuCard::new(i, core_per_card, memory_per_card))
                .collect(),
            tentative: None,
        }
    }

    /// Build from a cluster node's capacity labels
    pub fn from_node(node: &Node) -> Result<Self> {
        let capacity = labels::node_capacity(node)?;
        Ok(Self::new(
            &node.name,
            capacity.gpu_count,
            capacity.core_per_card,
            capacity.memory_per_card,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cards(&self) -> &[GpuCard] {
        &self.cards
    }

    /// Revert and drop any pending tentative plan
    pub fn clear_tentative(&mut self) -> Result<()> {
        if let Some(plan) = self.tentative.take() {
            for unit in plan.units() {
                self.cards[unit.gpu_index].revert(&unit.request())?;
            }
        }
        Ok(())
    }

    /// Tentatively place a demand: fit, commit the counters, and remember
    /// the plan until bind or the next assume. Clears any previous
    /// tentative plan first, so re-evaluation is safe.
    pub fn assume(&mut self, demand: &Demand, rater: &Rater) -> Result<()> {
        self.clear_tentative()?;
        let (units, _) = fit_cards(&self.cards, demand, rater)?;
        for unit in &units {
            self.cards[unit.gpu_index].commit(&unit.request())?;
        }
        self.tentative = Some(Plan::new(units));
        Ok(())
    }

    /// Rank this node for a demand without touching any counter. When the
    /// pending tentative plan is this same demand its commitments are
    /// excluded, so the score reflects placing the pod fresh.
    pub fn score(&self, demand: &Demand, rater: &Rater, load_factor: f64) -> i64 {
        let mut scratch = self.cards.clone();
        if let Some(tentative) = &self.tentative {
            if plan_matches(tentative, demand) {
                for unit in tentative.units() {
                    if scratch[unit.gpu_index].revert(&unit.request()).is_err() {
                        return SCORE_MIN;
                    }
                }
            }
        }
        match fit_cards(&scratch, demand, rater) {
            Ok((_, scores)) => rater.node_score(&scores, load_factor),
            Err(_) => SCORE_MIN,
        }
    }

    /// Promote the tentative plan to a bound plan, keeping its commitments.
    /// Runs a fresh assume when no matching tentative plan is pending.
    pub fn bind(&mut self, demand: &Demand, rater: &Rater) -> Result<Plan> {
        let pending = self
            .tentative
            .as_ref()
            .is_some_and(|t| plan_matches(t, demand));
        if !pending {
            self.assume(demand, rater)?;
        }
        self.tentative
            .take()
            .ok_or_else(|| Error::invariant(format!("bind on node {} without a tentative plan", self.name)))
    }

    /// Commit counters from an already-decided plan (reconciliation of a
    /// bound pod observed through the cluster). All-or-nothing.
    pub fn allocate(&mut self, plan: &Plan) -> Result<()> {
        let mut scratch = self.cards.clone();
        for unit in plan.units() {
            let card = scratch.get_mut(unit.gpu_index).ok_or_else(|| {
                Error::invariant(format!(
                    "plan references card {} but node {} has {}",
                    unit.gpu_index,
                    self.name,
                    self.cards.len()
                ))
            })?;
            card.commit(&unit.request())?;
        }
        self.cards = scratch;
        Ok(())
    }

    /// Subtract counters for a released pod. All-or-nothing.
    pub fn release(&mut self, plan: &Plan) -> Result<()> {
        let mut scratch = self.cards.clone();
        for unit in plan.units() {
            let card = scratch.get_mut(unit.gpu_index).ok_or_else(|| {
                Error::invariant(format!(
                    "plan references card {} but node {} has {}",
                    unit.gpu_index,
                    self.name,
                    self.cards.len()
                ))
            })?;
            card.revert(&unit.request())?;
        }
        self.cards = scratch;
        Ok(())
    }

    /// Deep copy for the status endpoint; the dealer fills in the usage
    /// readings, which live outside the node
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.name.clone(),
            cards: self.cards.clone(),
            core_usage: HashMap::new(),
            memory_usage: HashMap::new(),
        }
    }
}

/// Greedy fit of a demand over a copy of the given cards. Returns the
/// chosen placement units and their per-card scores; the input cards are
/// never mutated.
fn fit_cards(cards: &[GpuCard], demand: &Demand, rater: &Rater) -> Result<(Vec<PlanUnit>, Vec<i64>)> {
    let mut scratch = cards.to_vec();
    let mut units = Vec::with_capacity(demand.len());
    let mut scores = Vec::with_capacity(demand.len());
    for req in demand.iter() {
        let mut best: Option<(usize, i64)> = None;
        for card in &scratch {
            if !card.fits(req) {
                continue;
            }
            let score = rater.card_score(card, req);
            // Strict comparison keeps the lowest index on ties.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((card.index, score));
            }
        }
        let Some((index, score)) = best else {
            return Err(rejection(&scratch, req));
        };
        scratch[index].commit(req)?;
        units.push(PlanUnit {
            gpu_index: index,
            core: req.core,
            memory: req.memory,
        });
        scores.push(score);
    }
    Ok((units, scores))
}

/// No card fits the request: name the axis the lowest-index card lacks
fn rejection(cards: &[GpuCard], req: &ContainerRequest) -> Error {
    match cards.first() {
        Some(card) => Error::insufficient(card.missing_axis(req), card.index),
        None => Error::insufficient(ResourceAxis::Core, 0),
    }
}

fn plan_matches(plan: &Plan, demand: &Demand) -> bool {
    plan.len() == demand.len()
        && plan
            .units()
            .iter()
            .zip(demand.iter())
            .all(|(unit, req)| unit.request() == *req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use centigpu_core::{ContainerRequest, PlacementPolicy};

    fn demand(reqs: &[(u32, u64)]) -> Demand {
        reqs.iter()
            .map(|&(core, memory)| ContainerRequest { core, memory })
            .collect()
    }

    fn binpack() -> Rater {
        Rater::new(PlacementPolicy::BinPack)
    }

    fn spread() -> Rater {
        Rater::new(PlacementPolicy::Spread)
    }

    fn committed(node: &NodeInfo) -> Vec<(u32, u64)> {
        node.cards()
            .iter()
            .map(|c| (c.core_used, c.memory_used))
            .collect()
    }

    #[test]
    fn test_single_container_lands_on_first_card() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        node.assume(&demand(&[(30, 4096)]), &binpack()).unwrap();
        assert_eq!(committed(&node), vec![(30, 4096), (0, 0)]);
    }

    #[test]
    fn test_spread_breaks_ties_on_lower_index() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        node.assume(&demand(&[(30, 4096)]), &spread()).unwrap();
        assert_eq!(committed(&node), vec![(30, 4096), (0, 0)]);
    }

    #[test]
    fn test_two_containers_take_two_cards() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        let plan = node.bind(&demand(&[(60, 8192), (60, 8192)]), &binpack()).unwrap();
        assert_eq!(plan.annotation_value(), "0,1");
        assert_eq!(committed(&node), vec![(60, 8192), (60, 8192)]);
    }

    #[test]
    fn test_binpack_fills_busy_card_first() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        node.allocate(&Plan::new(vec![PlanUnit { gpu_index: 1, core: 50, memory: 4096 }]))
            .unwrap();
        let plan = node.bind(&demand(&[(20, 2048)]), &binpack()).unwrap();
        assert_eq!(plan.indices(), vec![1]);
    }

    #[test]
    fn test_spread_picks_emptier_card() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        node.allocate(&Plan::new(vec![PlanUnit { gpu_index: 0, core: 50, memory: 4096 }]))
            .unwrap();
        let plan = node.bind(&demand(&[(20, 2048)]), &spread()).unwrap();
        assert_eq!(plan.indices(), vec![1]);
    }

    #[test]
    fn test_overcommit_rejected_with_axis_reason() {
        let mut node = NodeInfo::new("n1", 1, 100, 16384);
        node.assume(&demand(&[(30, 4096)]), &binpack()).unwrap();
        let before = committed(&node);

        let err = node.assume(&demand(&[(80, 4096)]), &binpack()).unwrap_err();
        assert_eq!(err.to_string(), "gpu core insufficient on card 0");
        // The rejected assume cleared the previous tentative plan.
        assert_ne!(committed(&node), before);
        assert_eq!(committed(&node), vec![(0, 0)]);
    }

    #[test]
    fn test_failed_fit_rolls_back_partial_commits() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        // Two containers fit, the third cannot.
        let err = node
            .assume(&demand(&[(90, 1024), (90, 1024), (90, 1024)]), &binpack())
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientResource { .. }));
        assert_eq!(committed(&node), vec![(0, 0), (0, 0)]);
    }

    #[test]
    fn test_reassume_replaces_tentative_plan() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        node.assume(&demand(&[(30, 4096)]), &binpack()).unwrap();
        node.assume(&demand(&[(50, 2048)]), &binpack()).unwrap();
        assert_eq!(committed(&node), vec![(50, 2048), (0, 0)]);
    }

    #[test]
    fn test_score_ignores_own_tentative_commitments() {
        let mut node = NodeInfo::new("n1", 1, 100, 16384);
        let d = demand(&[(60, 4096)]);
        let before = node.score(&d, &binpack(), 1.0);
        node.assume(&d, &binpack()).unwrap();
        // Without exclusion a second 60-core fit would fail outright.
        assert_eq!(node.score(&d, &binpack(), 1.0), before);
        assert!(before > SCORE_MIN);
    }

    #[test]
    fn test_score_is_zero_when_unfittable() {
        let node = NodeInfo::new("n1", 1, 100, 2048);
        assert_eq!(node.score(&demand(&[(10, 4096)]), &binpack(), 1.0), SCORE_MIN);
    }

    #[test]
    fn test_score_does_not_mutate_counters() {
        let node = NodeInfo::new("n1", 2, 100, 16384);
        let _ = node.score(&demand(&[(40, 1024)]), &spread(), 1.0);
        assert_eq!(committed(&node), vec![(0, 0), (0, 0)]);
    }

    #[test]
    fn test_bind_without_assume_fits_fresh() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        let plan = node.bind(&demand(&[(30, 4096)]), &binpack()).unwrap();
        assert_eq!(plan.indices(), vec![0]);
        assert_eq!(committed(&node), vec![(30, 4096), (0, 0)]);
    }

    #[test]
    fn test_bind_after_other_pod_assumed_refits() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        node.assume(&demand(&[(30, 4096)]), &binpack()).unwrap();
        // A different pod was evaluated in between.
        node.assume(&demand(&[(10, 1024)]), &binpack()).unwrap();
        let plan = node.bind(&demand(&[(30, 4096)]), &binpack()).unwrap();
        assert_eq!(plan.len(), 1);
        // Only the bound pod's commitments remain.
        assert_eq!(committed(&node), vec![(30, 4096), (0, 0)]);
    }

    #[test]
    fn test_allocate_release_roundtrip() {
        let mut node = NodeInfo::new("n1", 2, 100, 16384);
        let plan = Plan::new(vec![
            PlanUnit { gpu_index: 0, core: 60, memory: 8192 },
            PlanUnit { gpu_index: 1, core: 60, memory: 8192 },
        ]);
        node.allocate(&plan).unwrap();
        assert_eq!(committed(&node), vec![(60, 8192), (60, 8192)]);
        node.release(&plan).unwrap();
        assert_eq!(committed(&node), vec![(0, 0), (0, 0)]);
    }

    #[test]
    fn test_allocate_out_of_range_card_fails_whole_plan() {
        let mut node = NodeInfo::new("n1", 1, 100, 16384);
        let plan = Plan::new(vec![
            PlanUnit { gpu_index: 0, core: 10, memory: 1024 },
            PlanUnit { gpu_index: 3, core: 10, memory: 1024 },
        ]);
        assert!(node.allocate(&plan).is_err());
        // Nothing from the plan landed.
        assert_eq!(committed(&node), vec![(0, 0)]);
    }

    #[test]
    fn test_from_node_reads_capacity_labels() {
        let cluster_node = Node::new("n1").with_gpu_capacity(4, 100, 24576);
        let node = NodeInfo::from_node(&cluster_node).unwrap();
        assert_eq!(node.cards().len(), 4);
        assert_eq!(node.cards()[3].memory_total, 24576);
    }
}
