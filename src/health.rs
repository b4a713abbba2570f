//! Probe and metrics endpoints
//!
//! `/healthz` answers as long as the process runs, `/readyz` only while this
//! replica holds the lease and runs its controllers, `/metrics` serves the
//! Prometheus text format.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// How a reconciliation ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the next change
    Converged,
    /// Progress depends on the cluster; checked again later
    Waiting,
    Failed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Converged => "converged",
            Outcome::Waiting => "waiting",
            Outcome::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct ReconcileLabels {
    controller: &'static str,
    namespace: String,
    name: String,
    outcome: &'static str,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("controller", self.controller).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("outcome", self.outcome).encode(encoder.encode_label())
    }
}

/// Single-label set, used for the controller, operation and phase families
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct KeyLabel {
    key: &'static str,
    value: String,
}

impl EncodeLabelSet for KeyLabel {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        (self.key, self.value.as_str()).encode(encoder.encode_label())
    }
}

fn key_label(key: &'static str, value: impl Into<String>) -> KeyLabel {
    KeyLabel {
        key,
        value: value.into(),
    }
}

/// Operator metrics, exposed on `/metrics`
pub struct Metrics {
    reconciliations: Family<ReconcileLabels, Counter>,
    reconcile_duration_seconds: Family<KeyLabel, Histogram>,
    operations: Family<KeyLabel, Counter>,
    dogus: Family<KeyLabel, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("dogu_operator");

        let reconciliations = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Reconciliations by controller, object and outcome",
            reconciliations.clone(),
        );

        let reconcile_duration_seconds =
            Family::<KeyLabel, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of one reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let operations = Family::<KeyLabel, Counter>::default();
        registry.register(
            "operations",
            "Dogu operations started, by operation",
            operations.clone(),
        );

        let dogus = Family::<KeyLabel, Gauge>::default();
        registry.register("dogus", "Dogus by lifecycle phase", dogus.clone());

        Self {
            reconciliations,
            reconcile_duration_seconds,
            operations,
            dogus,
            registry,
        }
    }

    /// Record a finished reconciliation of `controller` ("dogu" or "restart")
    pub fn record_reconcile(
        &self,
        controller: &'static str,
        namespace: &str,
        name: &str,
        outcome: Outcome,
        duration_secs: f64,
    ) {
        let labels = ReconcileLabels {
            controller,
            namespace: namespace.to_string(),
            name: name.to_string(),
            outcome: outcome.as_str(),
        };
        self.reconciliations.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&key_label("controller", controller))
            .observe(duration_secs);
    }

    pub fn record_operation(&self, operation: &str) {
        self.operations
            .get_or_create(&key_label("operation", operation))
            .inc();
    }

    /// Replace the per-phase dogu counts; phases missing from `counts` disappear
    pub fn set_dogus_by_phase(&self, counts: &HashMap<String, i64>) {
        self.dogus.clear();
        for (phase, count) in counts {
            self.dogus
                .get_or_create(&key_label("phase", phase.as_str()))
                .set(*count);
        }
    }

    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator holds the lease and runs its controllers
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the operator as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
///
/// Returns Prometheus-formatted metrics.
async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on all interfaces at the given port
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Health server listening");

    axum::serve(listener, app).await
}
