//! Prometheus metrics and the probe server.
//!
//! Serves `/metrics`, `/healthz` and `/readyz`. Readiness flips once the
//! startup store sync has completed.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

/// Operator metrics sharing one registry
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Reconciles by kind and result
    pub reconcile_total: CounterVec,
    /// NSX objects removed by the garbage collector, by kind
    pub gc_deleted_total: CounterVec,
    /// Inventory keys waiting for the next flush
    pub inventory_pending: IntGauge,
    registry: Arc<Registry>,
    ready: Arc<AtomicBool>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let reconcile_total = CounterVec::new(
            Opts::new("nsx_reconcile_total", "Reconciles by kind and result"),
            &["kind", "result"],
        )?;
        let gc_deleted_total = CounterVec::new(
            Opts::new("nsx_gc_deleted_total", "NSX objects deleted by garbage collection"),
            &["kind"],
        )?;
        let inventory_pending = IntGauge::new("nsx_inventory_pending", "Container inventory keys pending sync")?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(gc_deleted_total.clone()))?;
        registry.register(Box::new(inventory_pending.clone()))?;

        Ok(Self {
            reconcile_total,
            gc_deleted_total,
            inventory_pending,
            registry,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn record_reconcile(&self, kind: &str, ok: bool) {
        let result = if ok { RESULT_SUCCESS } else { RESULT_ERROR };
        self.reconcile_total.with_label_values(&[kind, result]).inc();
    }

    pub fn record_gc_deleted(&self, kind: &str, count: usize) {
        if count > 0 {
            self.gc_deleted_total
                .with_label_values(&[kind])
                .inc_by(count as f64);
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// All metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ControllerError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(e.to_string()))
    }
}

async fn metrics_handler(State(metrics): State<Metrics>) -> (StatusCode, String) {
    match metrics.gather() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Metrics>) -> (StatusCode, &'static str) {
    if metrics.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Serve metrics and probes until the listener fails
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("failed to bind {addr}: {e}")))?;
    info!("Metrics and probe server listening on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}
