//! # centigpu-extender
//!
//! HTTP scheduler-extender facade for centigpu.
//!
//! This crate provides:
//! - The extender wire contract (filter / prioritize / bind argument and
//!   result types)
//! - The axum server exposing `/filter`, `/prioritize`, `/bind` plus
//!   `/health`, `/status`, and `/metrics`
//! - The background usage refresher polling Prometheus for per-card
//!   utilisation
//! - Request counters exported in Prometheus text format

pub mod api;
pub mod metrics;
pub mod refresher;
pub mod server;

pub use api::{ExtenderArgs, ExtenderBindingArgs, ExtenderBindingResult, ExtenderFilterResult, HostPriority};
pub use metrics::ExtenderMetrics;
pub use refresher::UsageRefresher;
pub use server::AppState;
