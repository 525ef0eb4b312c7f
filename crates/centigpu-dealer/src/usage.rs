//! Usage cache for load-aware scoring
//!
//! Holds the latest utilisation sample per (node, axis, card). Samples carry
//! the time they were observed; a sample older than the caller's active
//! window is stale and contributes nothing to scoring. The cache has its own
//! synchronisation and is safe to read from inside the dealer's critical
//! section (lock order is always dealer first, cache second).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use centigpu_core::ResourceAxis;

/// A single utilisation observation, percent in 0..=100
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSample {
    pub value: f64,
    pub updated_at: Instant,
}

impl UsageSample {
    /// Whether the sample is recent enough to use
    pub fn is_fresh(&self, active_duration: Duration) -> bool {
        self.updated_at.elapsed() <= active_duration
    }
}

/// Latest per-(node, card) core% and memory% samples
#[derive(Debug, Default)]
pub struct UsageCache {
    samples: DashMap<(String, ResourceAxis, usize), UsageSample>,
}

impl UsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or refresh a sample observed just now
    pub fn record(&self, node: &str, axis: ResourceAxis, card: usize, value: f64) {
        self.record_aged(node, axis, card, value, Duration::ZERO);
    }

    /// Seed or refresh a sample observed `age` ago (metric sources report
    /// their own sample timestamps)
    pub fn record_aged(&self, node: &str, axis: ResourceAxis, card: usize, value: f64, age: Duration) {
        let Some(updated_at) = Instant::now().checked_sub(age) else {
            warn!("usage sample for {}/{} card {} older than process epoch, dropped", node, axis, card);
            return;
        };
        self.samples.insert(
            (node.to_string(), axis, card),
            UsageSample { value, updated_at },
        );
    }

    /// Read one sample: `(fresh, value)`. A missing or stale sample reads as
    /// `(false, 0.0)` and must never reject a node, only drop the load term.
    pub fn usage(&self, node: &str, axis: ResourceAxis, card: usize, active_duration: Duration) -> (bool, f64) {
        match self.samples.get(&(node.to_string(), axis, card)) {
            Some(sample) if sample.is_fresh(active_duration) => (true, sample.value),
            _ => (false, 0.0),
        }
    }

    /// Snapshot every sample for one node and axis, fresh or not
    pub fn node_usage(&self, node: &str, axis: ResourceAxis) -> HashMap<usize, UsageSample> {
        self.samples
            .iter()
            .filter(|entry| {
                let (n, a, _) = entry.key();
                n == node && *a == axis
            })
            .map(|entry| (entry.key().2, *entry.value()))
            .collect()
    }

    /// Mean of the fresh samples for one node and axis over `cards` cards,
    /// or `None` when every sample is stale or missing
    pub fn fresh_average(
        &self,
        node: &str,
        axis: ResourceAxis,
        cards: usize,
        active_duration: Duration,
    ) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for card in 0..cards {
            let (fresh, value) = self.usage(node, axis, card, active_duration);
            if fresh {
                sum += value;
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn test_missing_sample_reads_stale() {
        let cache = UsageCache::new();
        assert_eq!(cache.usage("n1", ResourceAxis::Core, 0, WINDOW), (false, 0.0));
    }

    #[test]
    fn test_record_and_read() {
        let cache = UsageCache::new();
        cache.record("n1", ResourceAxis::Core, 0, 42.5);
        assert_eq!(cache.usage("n1", ResourceAxis::Core, 0, WINDOW), (true, 42.5));
        // The other axis is untouched.
        assert_eq!(cache.usage("n1", ResourceAxis::Memory, 0, WINDOW), (false, 0.0));
    }

    #[test]
    fn test_aged_sample_goes_stale() {
        let cache = UsageCache::new();
        cache.record_aged("n1", ResourceAxis::Core, 0, 90.0, Duration::from_secs(60));
        assert_eq!(cache.usage("n1", ResourceAxis::Core, 0, WINDOW), (false, 0.0));
        // A wider window still sees it.
        assert_eq!(
            cache.usage("n1", ResourceAxis::Core, 0, Duration::from_secs(120)),
            (true, 90.0)
        );
    }

    #[test]
    fn test_refresh_replaces_sample() {
        let cache = UsageCache::new();
        cache.record("n1", ResourceAxis::Memory, 1, 10.0);
        cache.record("n1", ResourceAxis::Memory, 1, 55.0);
        assert_eq!(cache.usage("n1", ResourceAxis::Memory, 1, WINDOW), (true, 55.0));
    }

    #[test]
    fn test_fresh_average_skips_stale_cards() {
        let cache = UsageCache::new();
        cache.record("n1", ResourceAxis::Core, 0, 40.0);
        cache.record_aged("n1", ResourceAxis::Core, 1, 100.0, Duration::from_secs(60));
        assert_eq!(cache.fresh_average("n1", ResourceAxis::Core, 2, WINDOW), Some(40.0));
        assert_eq!(cache.fresh_average("n2", ResourceAxis::Core, 2, WINDOW), None);
    }

    #[test]
    fn test_node_usage_snapshot() {
        let cache = UsageCache::new();
        cache.record("n1", ResourceAxis::Core, 0, 10.0);
        cache.record("n1", ResourceAxis::Core, 1, 20.0);
        cache.record("n2", ResourceAxis::Core, 0, 99.0);
        let snapshot = cache.node_usage("n1", ResourceAxis::Core);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&1].value, 20.0);
    }
}
