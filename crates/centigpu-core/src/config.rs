//! Extender configuration
//!
//! A small YAML policy file can set everything; CLI flags override it in the
//! binary. Defaults are usable out of the box for a single-scheduler cluster.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Placement policy selecting the rating direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementPolicy {
    /// Prefer cards with the smallest residual after placement, concentrating
    /// load so whole cards stay free
    BinPack,
    /// Prefer cards with the largest residual after placement, levelling load
    Spread,
}

impl std::str::FromStr for PlacementPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binpack" => Ok(PlacementPolicy::BinPack),
            "spread" => Ok(PlacementPolicy::Spread),
            _ => Err(format!("unknown placement policy: {}", s)),
        }
    }
}

impl std::fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementPolicy::BinPack => write!(f, "binpack"),
            PlacementPolicy::Spread => write!(f, "spread"),
        }
    }
}

/// Top-level extender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Placement policy
    pub policy: PlacementPolicy,

    /// Weight node scores by observed live utilisation
    pub load_aware: bool,

    /// Prometheus base URL for the usage refresher
    pub prometheus_url: Option<String>,

    /// Usage cache and refresher settings
    pub usage: UsageConfig,

    /// HTTP server settings
    pub server: ServerConfig,
}

/// Usage cache and refresher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Samples older than this are stale and contribute nothing to scoring
    pub active_duration: Duration,

    /// How often the refresher polls Prometheus
    pub refresh_interval: Duration,

    /// Instant-vector query yielding per-(node, card) core utilisation 0..100
    pub core_query: String,

    /// Instant-vector query yielding per-(node, card) memory utilisation 0..100
    pub memory_query: String,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the extender endpoints
    pub bind_address: String,

    /// Listen port
    pub port: u16,

    /// Deadline applied to each bind request's cluster writes
    pub request_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: PlacementPolicy::BinPack,
            load_aware: false,
            prometheus_url: None,
            usage: UsageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            active_duration: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(10),
            core_query: "gpu_core_usage_percent".to_string(),
            memory_query: "gpu_memory_usage_percent".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3456,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    /// Load a policy file, leaving unset fields at their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field combinations
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::config("listen port must be greater than 0"));
        }
        if self.server.request_timeout.is_zero() {
            return Err(Error::config("request timeout must be greater than 0"));
        }
        if self.usage.active_duration.is_zero() {
            return Err(Error::config("usage active duration must be greater than 0"));
        }
        if self.usage.refresh_interval.is_zero() {
            return Err(Error::config("usage refresh interval must be greater than 0"));
        }
        if self.load_aware && self.prometheus_url.is_none() {
            return Err(Error::config(
                "load-aware scheduling requires a prometheus url",
            ));
        }
        Ok(())
    }
}
