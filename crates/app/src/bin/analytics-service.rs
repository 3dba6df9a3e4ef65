/// Analytics service entry point.
///
/// Ingests the order events topic idempotently and serves the derived
/// statistics over HTTP.
#[tokio::main]
async fn main() {
    if let Err(e) = app::run_analytics_service().await {
        eprintln!("analytics-service: fatal: {e:#}");
        std::process::exit(1);
    }
}
