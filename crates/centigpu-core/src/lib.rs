//! # centigpu-core
//!
//! Core types, contract, and configuration for centigpu - a fractional-GPU
//! scheduling extender for a container orchestrator.
//!
//! This crate provides the foundational pieces shared by the dealer and the
//! HTTP extender:
//!
//! - The pod/node contract (labels, annotations, resource request keys)
//! - A reduced cluster object model (`Pod`, `Node`)
//! - `Demand` and `Plan`: per-container GPU requests and chosen GPU indices
//! - The unified error type and result alias
//! - Configuration schema and parsing utilities
//! - The `ClusterProvider` trait and its cache-backed implementation

pub mod cluster;
pub mod config;
pub mod demand;
pub mod error;
pub mod labels;
pub mod types;

// Re-export commonly used types at the crate root
pub use cluster::{CachedCluster, ClusterProvider};
pub use config::{PlacementPolicy, SchedulerConfig, ServerConfig, UsageConfig};
pub use demand::{ContainerRequest, Demand, Plan, PlanUnit};
pub use error::{Error, Result};
pub use types::{Container, Node, Pod, PodUid, ResourceAxis};
