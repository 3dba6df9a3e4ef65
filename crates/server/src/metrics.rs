//! HTTP request metrics shared by all three services.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::error;

/// Per-service HTTP metrics, registered into the service's registry.
pub struct HttpMetrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl HttpMetrics {
    /// Creates the metric families and registers them with `registry`.
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        })
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

/// Middleware recording count, latency and error totals per request.
pub async fn track_requests(
    State(metrics): State<Arc<HttpMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();

    metrics.record_request(&method, &path, status, start.elapsed());
    if status >= 400 {
        metrics.record_error("http", &path);
    }

    response
}

/// `GET /metrics`: the service registry in Prometheus text format.
pub async fn handle_metrics(Extension(metrics): Extension<Arc<HttpMetrics>>) -> Response {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to convert metrics to UTF-8: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
        }
    }
}
