//! Background usage refresher
//!
//! Polls the Prometheus query API on an interval for two instant vectors,
//! one per utilisation axis, and feeds the usage cache. Each sample is
//! recorded with the age Prometheus reports for it, so staleness decisions
//! in the rater work off observation time rather than poll time. Poll
//! failures are logged and the next tick tries again; the dealer simply
//! scores without a load term in the meantime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, warn};

use centigpu_core::{Error, ResourceAxis, Result, UsageConfig};
use centigpu_dealer::UsageCache;

/// Metric label naming the node a sample belongs to
const NODE_LABEL: &str = "node";

/// Metric label naming the card index a sample belongs to
const CARD_LABEL: &str = "card";

/// Periodic poller feeding the usage cache from Prometheus
pub struct UsageRefresher {
    client: Client,
    base_url: String,
    cache: Arc<UsageCache>,
    config: UsageConfig,
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: PromData,
}

#[derive(Debug, Default, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromSample>,
}

#[derive(Debug, Deserialize)]
struct PromSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// Prometheus instant-vector value: [unix seconds, value string]
    value: (f64, String),
}

impl UsageRefresher {
    pub fn new(base_url: impl Into<String>, cache: Arc<UsageCache>, config: UsageConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            cache,
            config,
        }
    }

    /// Poll until the shutdown flag flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        warn!("usage refresh failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    debug!("usage refresher stopping");
                    break;
                }
            }
        }
    }

    /// One full poll of both axes
    pub async fn refresh_once(&self) -> Result<()> {
        self.refresh_axis(ResourceAxis::Core, &self.config.core_query).await?;
        self.refresh_axis(ResourceAxis::Memory, &self.config.memory_query).await
    }

    async fn refresh_axis(&self, axis: ResourceAxis, query: &str) -> Result<()> {
        let url = format!("{}/api/v1/query", self.base_url.trim_end_matches('/'));
        let response: PromResponse = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| Error::network(format!("query {}: {}", url, e)))?
            .json()
            .await
            .map_err(|e| Error::network(format!("decode {} response: {}", url, e)))?;
        if response.status != "success" {
            return Err(Error::network(format!(
                "prometheus answered {} for {}",
                response.status, query
            )));
        }
        let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let applied = apply_samples(&self.cache, axis, response.data, now);
        debug!("refreshed {} {} samples", applied, axis);
        Ok(())
    }
}

/// Record every well-formed sample; returns how many were applied
fn apply_samples(cache: &UsageCache, axis: ResourceAxis, data: PromData, now_secs: f64) -> usize {
    let mut applied = 0usize;
    for sample in data.result {
        let Some(node) = sample.metric.get(NODE_LABEL) else {
            continue;
        };
        let Some(card) = sample.metric.get(CARD_LABEL).and_then(|c| c.parse().ok()) else {
            continue;
        };
        let Ok(value) = sample.value.1.parse::<f64>() else {
            continue;
        };
        let age = Duration::from_secs_f64((now_secs - sample.value.0).max(0.0));
        cache.record_aged(node, axis, card, value, age);
        applied += 1;
    }
    applied
}
