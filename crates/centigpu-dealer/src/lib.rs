//! # centigpu-dealer
//!
//! The resource-accounting and placement engine for centigpu.
//!
//! This crate provides:
//! - Per-card commitment accounting (`GpuCard`)
//! - The per-node fit engine with the assume/bind tentative-plan lifecycle
//!   (`NodeInfo`)
//! - Scoring policies: bin-pack and spread, optionally weighted by live
//!   utilisation (`Rater`)
//! - The usage cache feeding load-aware scoring (`UsageCache`)
//! - The process-wide dealer serialising assume/score/bind and the informer
//!   lifecycle callbacks (`Dealer`)

pub mod dealer;
pub mod gpu;
pub mod node;
pub mod rater;
pub mod usage;

// Re-export commonly used types
pub use centigpu_core::{Error, Result};
pub use dealer::{Dealer, ASSUME_WORKERS};
pub use gpu::GpuCard;
pub use node::{NodeInfo, NodeSnapshot};
pub use rater::{Rater, SCORE_MAX, SCORE_MIN};
pub use usage::{UsageCache, UsageSample};
