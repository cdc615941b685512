use crate::server::ServerState;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Body of `/health`: liveness plus current load.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Identities with a bound session.
    sessions: usize,
    /// Open sockets, including ones still logging in.
    connections: usize,
}

/// Body of `/ready`.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// What the monitoring endpoint reports on: the live server plus a
/// readiness flag that is cleared while the server drains.
#[derive(Clone)]
pub struct HealthState {
    server: Arc<ServerState>,
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Ready health state for `server`.
    #[must_use]
    pub fn new(server: Arc<ServerState>) -> Self {
        Self {
            server,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the service as ready or draining.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the service is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// # Errors
///
/// Returns an error if installing the recorder or binding the listener fails.
pub async fn start_metrics_server(addr: SocketAddr, health: HealthState) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(health);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(health): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        sessions: health.server.registry.len(),
        connections: health.server.active_connections.load(Ordering::Relaxed),
    })
}

/// 503 once shutdown has started, so load balancers stop sending traffic.
async fn ready_handler(State(health): State<HealthState>) -> (StatusCode, Json<ReadyResponse>) {
    if health.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "draining",
                ready: false,
            }),
        )
    }
}

/// Session gauges.
pub mod gauges {
    /// Increment the bound-sessions gauge.
    pub fn inc_sessions_active() {
        metrics::gauge!("natter_sessions_active").increment(1.0);
    }

    /// Decrement the bound-sessions gauge.
    pub fn dec_sessions_active() {
        metrics::gauge!("natter_sessions_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record a login handshake with the given outcome label.
    pub fn handshakes_total(status: &'static str) {
        metrics::counter!("natter_handshakes_total", "status" => status).increment(1);
    }

    /// Increment the evicted-sessions counter.
    pub fn sessions_evicted_total() {
        metrics::counter!("natter_sessions_evicted_total").increment(1);
    }

    /// Increment the routed-frames counter for a message kind.
    pub fn frames_routed_total(kind: &'static str) {
        metrics::counter!("natter_frames_routed_total", "kind" => kind).increment(1);
    }

    /// Increment the dropped-frames counter with the given reason label.
    pub fn frames_dropped_total(reason: &'static str) {
        metrics::counter!("natter_frames_dropped_total", "reason" => reason).increment(1);
    }

    /// Record a notification with its outcome label.
    pub fn notifications_total(outcome: &'static str) {
        metrics::counter!("natter_notifications_total", "outcome" => outcome).increment(1);
    }

    /// Record bytes moved in the given direction.
    pub fn frame_bytes_total(direction: &'static str, bytes: u64) {
        metrics::counter!("natter_frame_bytes_total", "direction" => direction).increment(bytes);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record the time spent handling one inbound frame, in seconds.
    pub fn inbound_latency_seconds(value: f64) {
        metrics::histogram!("natter_inbound_latency_seconds").record(value);
    }
}
