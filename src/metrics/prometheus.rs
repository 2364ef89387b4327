//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge_vec,
    CounterVec, Encoder, HistogramVec, IntCounter, IntGaugeVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "db_cluster_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "db_cluster_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["kind"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "db_cluster_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Keys handed back to the queue for another pass
    pub static ref REQUEUES: CounterVec = register_counter_vec!(
        "db_cluster_operator_requeues_total",
        "Total number of rate limited requeues",
        &["kind"]
    ).unwrap();

    /// Reconciliations dropped without retry
    pub static ref IGNORED: CounterVec = register_counter_vec!(
        "db_cluster_operator_ignored_total",
        "Total number of reconciliations ignored",
        &["kind"]
    ).unwrap();

    /// Failed PD health probes
    pub static ref PD_PROBE_FAILURES: CounterVec = register_counter_vec!(
        "db_cluster_operator_pd_probe_failures_total",
        "Total number of failed PD health probes by endpoint kind",
        &["kind"]
    ).unwrap();

    /// Resolutions that settled on a member instead of the service
    pub static ref PD_FAILOVERS: CounterVec = register_counter_vec!(
        "db_cluster_operator_pd_failovers_total",
        "Total number of failovers to a PD member endpoint",
        &["kind"]
    ).unwrap();

    /// Writes rejected for a stale resource version
    pub static ref UPDATE_CONFLICTS: IntCounter = register_int_counter!(
        "db_cluster_operator_update_conflicts_total",
        "Total number of update conflicts"
    ).unwrap();

    /// Updates that ran out of attempts
    pub static ref UPDATE_EXHAUSTED: IntCounter = register_int_counter!(
        "db_cluster_operator_update_exhausted_total",
        "Total number of updates that exhausted their retry budget"
    ).unwrap();

    /// Keys waiting in a work queue
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "db_cluster_operator_queue_depth",
        "Number of keys waiting in the work queue",
        &["queue"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "db_cluster_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path()))
}

fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => health_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Liveness and readiness follow the health gauge
fn health_response() -> Response<Full<Bytes>> {
    if OPERATOR_HEALTH.get() > 0.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}
