//! HTTP layer of the three services.
//!
//! One [`Server`] wrapper owns the listener and graceful shutdown; the
//! per-service routers translate typed service errors into status codes:
//! 400 for validation, 404 for missing things, 409 for conflicts, 500
//! otherwise.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

pub mod analytics;
pub mod metrics;
pub mod order;
pub mod payment;

pub use metrics::HttpMetrics;

/// An HTTP server bound to one service's router.
pub struct Server {
    port: u16,
    router: Router,
}

impl Server {
    pub fn new(port: u16, router: Router) -> Self {
        info!("Initializing HTTP server on port {port}");
        Self { port, router }
    }

    /// Starts the server and blocks until a shutdown signal arrives.
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// Waits for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Wires the health and metrics endpoints plus the request-metrics middleware
/// into a service router.
pub fn with_common_routes(router: Router, metrics: Arc<HttpMetrics>) -> Router {
    use axum::routing::get;

    router
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics::handle_metrics))
        .layer(axum::middleware::from_fn_with_state(
            metrics.clone(),
            metrics::track_requests,
        ))
        .layer(axum::Extension(metrics))
}

/// Raw pagination query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
}

impl PageParams {
    /// Validates `limit` into `[1, 100]` (default 20) and `offset` into
    /// `>= 0` (default 0).
    pub fn validate(&self) -> Result<(i64, i64), (StatusCode, String)> {
        let limit = self.limit.unwrap_or(20);
        if !(1..=100).contains(&limit) {
            return Err((StatusCode::BAD_REQUEST, "invalid limit parameter".into()));
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err((StatusCode::BAD_REQUEST, "invalid offset parameter".into()));
        }

        Ok((limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::PageParams;

    fn params(limit: Option<i64>, offset: Option<i64>) -> PageParams {
        PageParams { limit, offset }
    }

    #[test]
    fn defaults_apply_when_absent() {
        assert_eq!(params(None, None).validate().unwrap(), (20, 0));
    }

    #[test]
    fn bounds_are_inclusive() {
        assert_eq!(params(Some(1), Some(0)).validate().unwrap(), (1, 0));
        assert_eq!(params(Some(100), Some(5)).validate().unwrap(), (100, 5));
    }

    #[test]
    fn out_of_range_limit_is_rejected() {
        assert!(params(Some(0), None).validate().is_err());
        assert!(params(Some(101), None).validate().is_err());
    }

    #[test]
    fn negative_offset_is_rejected() {
        assert!(params(None, Some(-1)).validate().is_err());
    }
}
