//! Request counters exported in Prometheus text format

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use centigpu_core::{Error, Result};

/// Counters for the extender endpoints
#[derive(Debug, Clone)]
pub struct ExtenderMetrics {
    registry: Registry,
    pub filter_requests: IntCounter,
    pub prioritize_requests: IntCounter,
    pub bind_requests: IntCounter,
    /// Failed binds, labelled by error category
    pub bind_failures: IntCounterVec,
}

impl ExtenderMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let filter_requests = IntCounter::new(
            "centigpu_filter_requests_total",
            "Total number of filter requests",
        )
        .map_err(to_error)?;
        let prioritize_requests = IntCounter::new(
            "centigpu_prioritize_requests_total",
            "Total number of prioritize requests",
        )
        .map_err(to_error)?;
        let bind_requests = IntCounter::new(
            "centigpu_bind_requests_total",
            "Total number of bind requests",
        )
        .map_err(to_error)?;
        let bind_failures = IntCounterVec::new(
            Opts::new(
                "centigpu_bind_failures_total",
                "Total number of failed bind requests by error category",
            ),
            &["category"],
        )
        .map_err(to_error)?;

        for counter in [&filter_requests, &prioritize_requests, &bind_requests] {
            registry.register(Box::new(counter.clone())).map_err(to_error)?;
        }
        registry
            .register(Box::new(bind_failures.clone()))
            .map_err(to_error)?;

        Ok(Self {
            registry,
            filter_requests,
            prioritize_requests,
            bind_requests,
            bind_failures,
        })
    }

    /// Count one failed bind under its error category
    pub fn record_bind_failure(&self, category: &str) {
        self.bind_failures.with_label_values(&[category]).inc();
    }

    /// Export every registered metric as Prometheus text
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(to_error)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Other(anyhow::anyhow!("metrics are not valid utf-8: {e}")))
    }
}

fn to_error(e: prometheus::Error) -> Error {
    Error::Other(anyhow::anyhow!(e))
}
