//! centigpu-extender - fractional-GPU scheduler extender

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use centigpu_core::{CachedCluster, ClusterProvider, PlacementPolicy, SchedulerConfig};
use centigpu_dealer::{Dealer, UsageCache};
use centigpu_extender::{server, AppState, ExtenderMetrics, UsageRefresher};

/// Fractional-GPU scheduler extender
#[derive(Debug, Parser)]
#[command(name = "centigpu-extender")]
#[command(about = "Fractional-GPU scheduler extender")]
#[command(version)]
struct Cli {
    /// Placement policy: binpack or spread
    #[arg(long, default_value = "binpack")]
    priority: String,

    /// Optional YAML policy file; flags override its values
    #[arg(long, value_name = "FILE")]
    policy_config_path: Option<std::path::PathBuf>,

    /// Prometheus base URL for load-aware scoring
    #[arg(long)]
    prometheus_url: Option<String>,

    /// Weight node scores by observed live utilisation
    #[arg(long)]
    load_schedule: bool,

    /// Bind address for the extender endpoints
    #[arg(long, default_value = "0.0.0.0")]
    bind_address: String,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 3456)]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match &cli.policy_config_path {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("load policy file {}", path.display()))?,
        None => SchedulerConfig::default(),
    };
    config.policy = cli
        .priority
        .parse::<PlacementPolicy>()
        .map_err(|e| anyhow::anyhow!(e))?;
    if cli.load_schedule {
        config.load_aware = true;
    }
    if let Some(url) = cli.prometheus_url {
        config.prometheus_url = Some(url);
    }
    config.server.bind_address = cli.bind_address;
    config.server.port = cli.port;
    config.validate()?;

    info!(
        "starting centigpu extender: policy={}, load_aware={}",
        config.policy, config.load_aware
    );

    // The watch layer mirroring cluster objects into this cache runs outside
    // the extender process boundary.
    let cluster = CachedCluster::new();
    let provider: Arc<dyn ClusterProvider> = cluster.clone();

    let usage = Arc::new(UsageCache::new());
    let dealer = Arc::new(
        Dealer::new(provider.clone(), usage.clone(), config.usage.active_duration).await?,
    );
    let metrics = Arc::new(ExtenderMetrics::new()?);
    let config = Arc::new(config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if config.load_aware {
        match &config.prometheus_url {
            Some(url) => {
                let refresher =
                    UsageRefresher::new(url.clone(), usage.clone(), config.usage.clone());
                tokio::spawn(refresher.run(shutdown_rx.clone()));
                info!("usage refresher polling {}", url);
            }
            None => warn!("load-aware scoring enabled without a prometheus url"),
        }
    }

    let state = AppState {
        dealer,
        cluster: provider,
        config,
        metrics,
    };
    server::serve(state, shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    info!("centigpu extender stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {}", e);
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!("failed to install sigterm handler: {}", e),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
