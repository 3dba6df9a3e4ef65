/// Payment service entry point.
///
/// Captures payment windows from `order.created` events, processes payments
/// through the injected gateway and relays payment outcomes through the
/// transactional outbox.
#[tokio::main]
async fn main() {
    if let Err(e) = app::run_payment_service().await {
        eprintln!("payment-service: fatal: {e:#}");
        std::process::exit(1);
    }
}
