//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: Counter = register_counter!(
        "sops_operator_reconciliations_total",
        "Total number of SopsSecret reconciliations"
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: Counter = register_counter!(
        "sops_operator_reconciliation_errors_total",
        "Total number of failed SopsSecret reconciliations"
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: Histogram = register_histogram!(
        "sops_operator_reconcile_duration_seconds",
        "Duration of SopsSecret reconciliations in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Generated Secrets written (created or updated), by namespace
    pub static ref SECRETS_WRITTEN: CounterVec = register_counter_vec!(
        "sops_operator_secrets_written_total",
        "Generated Secrets created or updated, by target namespace",
        &["namespace"]
    ).unwrap();

    /// Generated Secrets deleted, by namespace
    pub static ref SECRETS_DELETED: CounterVec = register_counter_vec!(
        "sops_operator_secrets_deleted_total",
        "Generated Secrets deleted, by target namespace",
        &["namespace"]
    ).unwrap();

    /// Steady-state skips where the generated Secret was already in sync
    pub static ref SECRETS_IN_SYNC: Counter = register_counter!(
        "sops_operator_secrets_in_sync_total",
        "Namespace passes skipped because the generated Secret was in sync"
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "sops_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

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

/// Route HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/readyz" => plain_response(StatusCode::OK, "ok"),
        _ => plain_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Encode the metrics registry
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        );
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
