/// Order service entry point.
///
/// Owns the order lifecycle: accepts create commands over HTTP, reacts to
/// payment, kitchen and delivery events from the bus, and relays its own
/// events through the transactional outbox.
#[tokio::main]
async fn main() {
    if let Err(e) = app::run_order_service().await {
        eprintln!("order-service: fatal: {e:#}");
        std::process::exit(1);
    }
}
