//! Scoring policies
//!
//! The rater makes two decisions: which card a container prefers among the
//! cards it fits on, and how a whole node ranks for a pod. Bin-pack prefers
//! cards with the smallest residual after placement so whole cards stay
//! free; spread prefers the largest residual to level load. Node ranking is
//! the mean of the chosen per-card scores scaled into the extender contract
//! range, optionally weighted down by observed live utilisation.

use std::time::Duration;

use centigpu_core::{ContainerRequest, PlacementPolicy, ResourceAxis};

use crate::gpu::GpuCard;
use crate::usage::UsageCache;

/// Lowest score a node can report through the extender contract
pub const SCORE_MIN: i64 = 0;

/// Highest score a node can report through the extender contract
pub const SCORE_MAX: i64 = 10;

/// Per-card scores are computed on this internal scale before node-level
/// composition
const CARD_SCALE: f64 = 100.0;

/// Scoring policy for card preference and node ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rater {
    policy: PlacementPolicy,
}

impl Rater {
    pub fn new(policy: PlacementPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Score placing `req` on `card` given its current commitments, on the
    /// internal `0..=100` scale. Higher is preferred. The caller must have
    /// checked that the request fits.
    pub fn card_score(&self, card: &GpuCard, req: &ContainerRequest) -> i64 {
        let core_left = (card.core_free() - req.core) as f64 / card.core_total as f64;
        let memory_left = (card.memory_free() - req.memory) as f64 / card.memory_total as f64;
        let residual = (core_left + memory_left) / 2.0;
        let score = match self.policy {
            PlacementPolicy::BinPack => (1.0 - residual) * CARD_SCALE,
            PlacementPolicy::Spread => residual * CARD_SCALE,
        };
        score.round() as i64
    }

    /// Compose per-card scores into a node score in `SCORE_MIN..=SCORE_MAX`,
    /// weighted by `load_factor` in `0.0..=1.0` (1.0 is neutral).
    pub fn node_score(&self, card_scores: &[i64], load_factor: f64) -> i64 {
        if card_scores.is_empty() {
            return SCORE_MIN;
        }
        let mean = card_scores.iter().sum::<i64>() as f64 / card_scores.len() as f64;
        let scaled = mean / CARD_SCALE * SCORE_MAX as f64 * load_factor.clamp(0.0, 1.0);
        (scaled.round() as i64).clamp(SCORE_MIN, SCORE_MAX)
    }
}

/// Linear load penalty for a node: `1.0` with no fresh samples (neutral),
/// down to `0.0` when every card is fully busy on both axes. Missing or
/// stale samples only remove the adjustment, never reject the node.
pub fn load_factor(usage: &UsageCache, node: &str, cards: usize, active_duration: Duration) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for axis in [ResourceAxis::Core, ResourceAxis::Memory] {
        if let Some(mean) = usage.fresh_average(node, axis, cards, active_duration) {
            sum += mean;
            count += 1;
        }
    }
    if count == 0 {
        return 1.0;
    }
    let mean_busy = (sum / count as f64 / 100.0).clamp(0.0, 1.0);
    1.0 - mean_busy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(core: u32, memory: u64) -> ContainerRequest {
        ContainerRequest { core, memory }
    }

    #[test]
    fn test_binpack_prefers_fuller_card() {
        let rater = Rater::new(PlacementPolicy::BinPack);
        let empty = GpuCard::new(0, 100, 16384);
        let mut busy = GpuCard::new(1, 100, 16384);
        busy.commit(&req(50, 8192)).unwrap();

        let r = req(20, 2048);
        assert!(rater.card_score(&busy, &r) > rater.card_score(&empty, &r));
    }

    #[test]
    fn test_spread_prefers_emptier_card() {
        let rater = Rater::new(PlacementPolicy::Spread);
        let empty = GpuCard::new(0, 100, 16384);
        let mut busy = GpuCard::new(1, 100, 16384);
        busy.commit(&req(50, 8192)).unwrap();

        let r = req(20, 2048);
        assert!(rater.card_score(&empty, &r) > rater.card_score(&busy, &r));
    }

    #[test]
    fn test_node_score_bounds() {
        let rater = Rater::new(PlacementPolicy::BinPack);
        assert_eq!(rater.node_score(&[], 1.0), SCORE_MIN);
        for scores in [vec![0], vec![100], vec![100, 100, 100], vec![0, 100]] {
            let s = rater.node_score(&scores, 1.0);
            assert!((SCORE_MIN..=SCORE_MAX).contains(&s), "score {} out of range", s);
        }
        assert_eq!(rater.node_score(&[100], 1.0), SCORE_MAX);
        assert_eq!(rater.node_score(&[100], 0.0), SCORE_MIN);
    }

    #[test]
    fn test_load_factor_neutral_without_samples() {
        let usage = UsageCache::new();
        assert_eq!(load_factor(&usage, "n1", 2, Duration::from_secs(30)), 1.0);
    }

    #[test]
    fn test_load_factor_neutral_when_all_stale() {
        let usage = UsageCache::new();
        usage.record_aged("n1", ResourceAxis::Core, 0, 80.0, Duration::from_secs(120));
        usage.record_aged("n1", ResourceAxis::Memory, 0, 80.0, Duration::from_secs(120));
        assert_eq!(load_factor(&usage, "n1", 1, Duration::from_secs(30)), 1.0);
    }

    #[test]
    fn test_load_factor_penalises_busy_node() {
        let usage = UsageCache::new();
        let window = Duration::from_secs(30);
        usage.record("n1", ResourceAxis::Core, 0, 50.0);
        usage.record("n1", ResourceAxis::Memory, 0, 50.0);
        assert_eq!(load_factor(&usage, "n1", 1, window), 0.5);

        usage.record("n2", ResourceAxis::Core, 0, 100.0);
        usage.record("n2", ResourceAxis::Memory, 0, 100.0);
        assert_eq!(load_factor(&usage, "n2", 1, window), 0.0);
    }

    #[test]
    fn test_load_weighted_score_matches_plain_when_stale() {
        let rater = Rater::new(PlacementPolicy::Spread);
        let usage = UsageCache::new();
        usage.record_aged("n1", ResourceAxis::Core, 0, 95.0, Duration::from_secs(300));
        let factor = load_factor(&usage, "n1", 1, Duration::from_secs(30));
        assert_eq!(rater.node_score(&[80], factor), rater.node_score(&[80], 1.0));
    }
}
