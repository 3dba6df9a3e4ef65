use app_config::AppConfig;
use std::time::Duration;

#[test]
fn test_load_default_config() {
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.http_port, 8080);
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.kafka_brokers, vec!["localhost:9092".to_string()]);
    assert_eq!(cfg.kafka_topic_order_events, "order.events");
    assert_eq!(cfg.outbox_batch_limit, 50);
    assert_eq!(cfg.outbox_interval, Duration::from_secs(5));
    assert_eq!(cfg.outbox_requeue_interval, Duration::from_secs(30));
    assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
}
