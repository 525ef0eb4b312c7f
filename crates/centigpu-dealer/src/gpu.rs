//! Per-card commitment accounting
//!
//! A `GpuCard` tracks committed core units and memory MiB against fixed
//! totals. `commit` and `revert` are the only mutations; both keep the
//! counters inside `0..=total` or fail.

use serde::{Deserialize, Serialize};

use centigpu_core::{ContainerRequest, Error, ResourceAxis, Result};

/// One physical GPU on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCard {
    /// 0-based index on the node
    pub index: usize,

    /// Total core units, normalised to 100 per card
    pub core_total: u32,

    /// Committed core units
    pub core_used: u32,

    /// Total memory in MiB
    pub memory_total: u64,

    /// Committed memory in MiB
    pub memory_used: u64,
}

impl GpuCard {
    /// A fresh card with nothing committed
    pub fn new(index: usize, core_total: u32, memory_total: u64) -> Self {
        Self {
            index,
            core_total,
            core_used: 0,
            memory_total,
            memory_used: 0,
        }
    }

    /// Uncommitted core units
    pub fn core_free(&self) -> u32 {
        self.core_total - self.core_used
    }

    /// Uncommitted memory MiB
    pub fn memory_free(&self) -> u64 {
        self.memory_total - self.memory_used
    }

    /// Whether the request fits on this card as it stands
    pub fn fits(&self, req: &ContainerRequest) -> bool {
        self.core_free() >= req.core && self.memory_free() >= req.memory
    }

    /// The axis the request lacks on this card, for rejection reasons
    pub fn missing_axis(&self, req: &ContainerRequest) -> ResourceAxis {
        if self.core_free() < req.core {
            ResourceAxis::Core
        } else {
            ResourceAxis::Memory
        }
    }

    /// Add the request to the committed totals
    pub fn commit(&mut self, req: &ContainerRequest) -> Result<()> {
        if !self.fits(req) {
            return Err(Error::insufficient(self.missing_axis(req), self.index));
        }
        self.core_used += req.core;
        self.memory_used += req.memory;
        Ok(())
    }

    /// Subtract the request from the committed totals
    pub fn revert(&mut self, req: &ContainerRequest) -> Result<()> {
        if self.core_used < req.core || self.memory_used < req.memory {
            return Err(Error::invariant(format!(
                "revert of ({}, {}) underflows card {} at ({}, {})",
                req.core, req.memory, self.index, self.core_used, self.memory_used
            )));
        }
        self.core_used -= req.core;
        self.memory_used -= req.memory;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(core: u32, memory: u64) -> ContainerRequest {
        ContainerRequest { core, memory }
    }

    #[test]
    fn test_fit_checks_both_axes() {
        let card = GpuCard::new(0, 100, 16384);
        assert!(card.fits(&req(100, 16384)));
        assert!(!card.fits(&req(101, 16384)));
        assert!(!card.fits(&req(100, 16385)));
    }

    #[test]
    fn test_commit_and_revert_roundtrip() {
        let mut card = GpuCard::new(0, 100, 16384);
        card.commit(&req(30, 4096)).unwrap();
        assert_eq!(card.core_used, 30);
        assert_eq!(card.memory_used, 4096);
        assert_eq!(card.core_free(), 70);

        card.revert(&req(30, 4096)).unwrap();
        assert_eq!(card.core_used, 0);
        assert_eq!(card.memory_used, 0);
    }

    #[test]
    fn test_commit_overflow_names_axis() {
        let mut card = GpuCard::new(1, 100, 16384);
        card.commit(&req(60, 4096)).unwrap();

        let err = card.commit(&req(60, 4096)).unwrap_err();
        assert_eq!(err.to_string(), "gpu core insufficient on card 1");
        // A failed commit leaves the counters untouched.
        assert_eq!(card.core_used, 60);
        assert_eq!(card.memory_used, 4096);

        let err = card.commit(&req(10, 16384)).unwrap_err();
        assert_eq!(err.to_string(), "gpu memory insufficient on card 1");
    }

    #[test]
    fn test_revert_underflow_is_invariant_violation() {
        let mut card = GpuCard::new(0, 100, 16384);
        let err = card.revert(&req(1, 0)).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }
}
