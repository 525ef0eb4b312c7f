//! HTTP extender facade
//!
//! Exposes the three extender endpoints the cluster scheduler calls, plus
//! health, a deep inventory snapshot, and Prometheus metrics. Filter-time
//! failures never abort a request; every rejected node gets a reason cell in
//! the response. Bind is the only handler doing cluster I/O and runs under
//! the configured request deadline.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use centigpu_core::{ClusterProvider, Error, Pod, Result, SchedulerConfig};
use centigpu_dealer::Dealer;

use crate::api::{
    ExtenderArgs, ExtenderBindingArgs, ExtenderBindingResult, ExtenderFilterResult, HostPriority,
};
use crate::metrics::ExtenderMetrics;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dealer: Arc<Dealer>,
    pub cluster: Arc<dyn ClusterProvider>,
    pub config: Arc<SchedulerConfig>,
    pub metrics: Arc<ExtenderMetrics>,
}

/// Build the route table
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/filter", post(filter_handler))
        .route("/prioritize", post(prioritize_handler))
        .route("/bind", post(bind_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the shutdown future resolves
pub async fn serve(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.bind_address, state.config.server.port
    )
    .parse()
    .map_err(|e| Error::config(format!("invalid bind address: {e}")))?;

    info!("extender listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Which candidate nodes can host this pod
pub async fn run_filter(state: &AppState, args: ExtenderArgs) -> ExtenderFilterResult {
    state.metrics.filter_requests.inc();
    let pod: Pod = args.pod.into();
    let nodes = args.node_names.unwrap_or_default();

    let (passed, reasons) = state.dealer.assume(&nodes, &pod, state.config.policy).await;

    let mut node_names = Vec::new();
    let mut failed_nodes = HashMap::new();
    for (i, name) in nodes.iter().enumerate() {
        if passed[i] {
            node_names.push(name.clone());
        } else {
            let reason = reasons[i]
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unschedulable".to_string());
            failed_nodes.insert(name.clone(), reason);
        }
    }
    state.dealer.log_status("filter", &pod).await;

    ExtenderFilterResult {
        node_names: Some(node_names),
        failed_nodes,
        error: String::new(),
    }
}

/// How the candidate nodes rank for this pod
pub async fn run_prioritize(state: &AppState, args: ExtenderArgs) -> Vec<HostPriority> {
    state.metrics.prioritize_requests.inc();
    let pod: Pod = args.pod.into();
    let nodes = args.node_names.unwrap_or_default();

    let scores = state
        .dealer
        .score(&nodes, &pod, state.config.policy, state.config.load_aware)
        .await;

    nodes
        .into_iter()
        .zip(scores)
        .map(|(host, score)| HostPriority { host, score })
        .collect()
}

/// Bind the pod to the chosen node under the request deadline
pub async fn run_bind(state: &AppState, args: ExtenderBindingArgs) -> ExtenderBindingResult {
    state.metrics.bind_requests.inc();
    let outcome = tokio::time::timeout(
        state.config.server.request_timeout,
        bind_pod(state, &args),
    )
    .await;

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!("bind of {}/{} failed: {}", args.pod_namespace, args.pod_name, e);
            state.metrics.record_bind_failure(e.category());
            Some(e.to_string())
        }
        Err(_) => {
            error!("bind of {}/{} timed out", args.pod_namespace, args.pod_name);
            state.metrics.record_bind_failure("timeout");
            Some(format!(
                "bind of {}/{} timed out",
                args.pod_namespace, args.pod_name
            ))
        }
    };
    ExtenderBindingResult { error }
}

async fn bind_pod(state: &AppState, args: &ExtenderBindingArgs) -> Result<()> {
    let pod = state
        .cluster
        .get_pod(&args.pod_namespace, &args.pod_name)
        .await?;
    if pod.uid.as_str() != args.pod_uid {
        return Err(Error::conflict(format!(
            "pod {} was replaced: expected uid {}, found {}",
            pod.full_name(),
            args.pod_uid,
            pod.uid
        )));
    }
    state.dealer.bind(&args.node, &pod, state.config.policy).await?;
    state.dealer.log_status("bind", &pod).await;
    Ok(())
}

// HTTP handler functions

async fn filter_handler(
    State(state): State<AppState>,
    Json(args): Json<ExtenderArgs>,
) -> impl IntoResponse {
    Json(run_filter(&state, args).await)
}

async fn prioritize_handler(
    State(state): State<AppState>,
    Json(args): Json<ExtenderArgs>,
) -> impl IntoResponse {
    Json(run_prioritize(&state, args).await)
}

async fn bind_handler(
    State(state): State<AppState>,
    Json(args): Json<ExtenderBindingArgs>,
) -> impl IntoResponse {
    Json(run_bind(&state, args).await)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dealer.status().await)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("metrics export failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{WireContainer, WireMeta, WirePod, WireResources, WireSpec};
    use centigpu_core::{labels, CachedCluster, Container, Node, PodUid};
    use centigpu_dealer::UsageCache;
    use std::time::Duration;

    fn wire_pod(name: &str, uid: &str, requests: &[(u32, u64)]) -> WirePod {
        WirePod {
            metadata: WireMeta {
                name: name.to_string(),
                namespace: "default".to_string(),
                uid: uid.to_string(),
                labels: HashMap::from([(
                    labels::ASSUME_LABEL.to_string(),
                    labels::ASSUME_VALUE.to_string(),
                )]),
                ..Default::default()
            },
            spec: WireSpec {
                node_name: None,
                containers: requests
                    .iter()
                    .enumerate()
                    .map(|(i, &(core, memory))| WireContainer {
                        name: format!("c{i}"),
                        resources: WireResources {
                            requests: HashMap::from([
                                (labels::CORE_RESOURCE.to_string(), core.to_string()),
                                (labels::MEMORY_RESOURCE.to_string(), memory.to_string()),
                            ]),
                        },
                    })
                    .collect(),
            },
        }
    }

    async fn test_state(cluster: Arc<CachedCluster>) -> AppState {
        let dealer = Dealer::new(
            cluster.clone(),
            Arc::new(UsageCache::new()),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        AppState {
            dealer: Arc::new(dealer),
            cluster,
            config: Arc::new(SchedulerConfig::default()),
            metrics: Arc::new(ExtenderMetrics::new().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_filter_splits_passed_and_failed() {
        let cluster = CachedCluster::new();
        cluster
            .upsert_node(Node::new("small").with_gpu_capacity(1, 100, 2048))
            .await;
        cluster
            .upsert_node(Node::new("big").with_gpu_capacity(1, 100, 16384))
            .await;
        let state = test_state(cluster).await;

        let args = ExtenderArgs {
            pod: wire_pod("trainer", "uid-1", &[(30, 4096)]),
            node_names: Some(vec!["small".to_string(), "big".to_string(), "ghost".to_string()]),
        };
        let result = run_filter(&state, args).await;

        assert_eq!(result.node_names.as_deref(), Some(&["big".to_string()][..]));
        assert_eq!(
            result.failed_nodes["small"],
            "gpu memory insufficient on card 0"
        );
        assert!(result.failed_nodes["ghost"].contains("unknown node"));
        assert!(result.error.is_empty());
        assert_eq!(state.metrics.filter_requests.get(), 1);
    }

    #[tokio::test]
    async fn test_prioritize_scores_every_candidate() {
        let cluster = CachedCluster::new();
        cluster
            .upsert_node(Node::new("n1").with_gpu_capacity(2, 100, 16384))
            .await;
        let state = test_state(cluster).await;

        let args = ExtenderArgs {
            pod: wire_pod("trainer", "uid-1", &[(30, 4096)]),
            node_names: Some(vec!["n1".to_string(), "ghost".to_string()]),
        };
        let priorities = run_prioritize(&state, args).await;

        assert_eq!(priorities.len(), 2);
        assert_eq!(priorities[0].host, "n1");
        assert!(priorities[0].score > priorities[1].score);
        assert_eq!(priorities[1].score, centigpu_dealer::SCORE_MIN);
    }

    #[tokio::test]
    async fn test_bind_flow_stamps_plan() {
        let cluster = CachedCluster::new();
        cluster
            .upsert_node(Node::new("n1").with_gpu_capacity(2, 100, 16384))
            .await;
        let pod = Pod {
            uid: PodUid::new("uid-1"),
            name: "trainer".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        }
        .with_assume_label()
        .with_container(Container::new("c0").with_gpu_request(30, 4096));
        cluster.upsert_pod(pod).await;
        let state = test_state(cluster.clone()).await;

        let result = run_bind(
            &state,
            ExtenderBindingArgs {
                pod_name: "trainer".to_string(),
                pod_namespace: "default".to_string(),
                pod_uid: "uid-1".to_string(),
                node: "n1".to_string(),
            },
        )
        .await;
        assert!(result.error.is_none(), "bind failed: {:?}", result.error);

        let stored = cluster.get_pod("default", "trainer").await.unwrap();
        assert_eq!(stored.plan_annotation(), Some("0"));
        assert_eq!(stored.node_name.as_deref(), Some("n1"));
        assert_eq!(state.metrics.bind_requests.get(), 1);
        assert!(!state.metrics.export().unwrap().contains("centigpu_bind_failures_total{"));
    }

    #[tokio::test]
    async fn test_bind_rejects_replaced_pod() {
        let cluster = CachedCluster::new();
        cluster
            .upsert_node(Node::new("n1").with_gpu_capacity(1, 100, 16384))
            .await;
        let pod = Pod {
            uid: PodUid::new("uid-new"),
            name: "trainer".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        }
        .with_assume_label()
        .with_container(Container::new("c0").with_gpu_request(30, 4096));
        cluster.upsert_pod(pod).await;
        let state = test_state(cluster).await;

        let result = run_bind(
            &state,
            ExtenderBindingArgs {
                pod_name: "trainer".to_string(),
                pod_namespace: "default".to_string(),
                pod_uid: "uid-old".to_string(),
                node: "n1".to_string(),
            },
        )
        .await;
        assert!(result.error.is_some());
        // The uid mismatch lands in the conflict category.
        assert_eq!(
            state.metrics.bind_failures.with_label_values(&["conflict"]).get(),
            1
        );
    }
}
