//! Composition roots for the three services.
//!
//! Each `run_*` function builds its service eagerly - pool, repositories,
//! services, consumers, outbox worker, HTTP server - then blocks on the HTTP
//! server until a shutdown signal arrives. Shutdown order: the HTTP listener
//! drains first, then the shared notify releases consumers and workers, then
//! their tasks are awaited within the configured timeout, and finally the
//! pool drops.

use std::sync::Arc;

use anyhow::{Context, Result};
use app_config::AppConfig;
use consumer::{
    AnalyticsIngestHandler, DeliveryEventsHandler, KitchenEventsHandler, OrderInfoHandler,
    PaymentEventsHandler,
};
use db::Transactor;
use kafka_consumer::{EventHandler, KafkaConsumer};
use kafka_producer::KafkaPublisher;
use outbox::{Worker, WorkerConfig};
use prometheus::Registry;
use repository::{
    PgOrderEventsRepository, PgOrderInfoRepository, PgOrdersRepository, PgOutboxRepository,
    PgPaymentsRepository,
};
use service::{
    AnalyticsMetrics, AnalyticsService, OrderService, PaymentService, SimulatedGateway,
};
use server::{HttpMetrics, Server};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initializes tracing with the configured level (env filter wins if set).
fn init_tracing(cfg: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Loads config, connects the pool and applies the service's migrations.
async fn bootstrap(service: &str) -> Result<(AppConfig, deadpool_postgres::Pool)> {
    let cfg = AppConfig::load()?;
    init_tracing(&cfg);
    info!("Starting {} v{}", cfg.app_name, cfg.app_version);

    let pool = db::init_db_pool(&cfg).await?;

    match db::find_migrations_dir(service).await {
        Some(dir) => {
            let conn = pool.get().await.context("Failed to get migration client")?;
            db::run_migrations(&conn, &dir).await?;
        }
        None => info!("No migrations directory found, skipping migrations"),
    }

    Ok((cfg, pool))
}

/// Spawns a consumer loop as a background task.
fn spawn_consumer<H: EventHandler + 'static>(
    consumer: KafkaConsumer,
    handler: H,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move { consumer.run(&handler, shutdown).await })
}

/// Awaits worker tasks, abandoning the stragglers after the grace period.
async fn drain_tasks(tasks: Vec<JoinHandle<()>>, cfg: &AppConfig) {
    for task in tasks {
        if tokio::time::timeout(cfg.shutdown_timeout, task).await.is_err() {
            warn!("background task did not stop within the shutdown timeout");
        }
    }
}

/// Runs the order service: HTTP commands, three reaction consumers and the
/// outbox relay.
pub async fn run_order_service() -> Result<()> {
    let (cfg, pool) = bootstrap("order").await?;

    let transactor = Transactor::new(pool.clone());
    let outbox_repo = PgOutboxRepository::new(pool.clone());
    let order_service = Arc::new(OrderService::new(
        transactor,
        PgOrdersRepository::new(),
        outbox_repo.clone(),
    ));

    let shutdown = Arc::new(Notify::new());
    let mut tasks = Vec::new();

    tasks.push(spawn_consumer(
        KafkaConsumer::new(
            &cfg.kafka_brokers,
            &cfg.kafka_topic_payment_events,
            &cfg.kafka_group_id,
        )?,
        PaymentEventsHandler::new(order_service.clone()),
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        KafkaConsumer::new(
            &cfg.kafka_brokers,
            &cfg.kafka_topic_kitchen_events,
            &cfg.kafka_group_id,
        )?,
        KitchenEventsHandler::new(order_service.clone()),
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        KafkaConsumer::new(
            &cfg.kafka_brokers,
            &cfg.kafka_topic_delivery_events,
            &cfg.kafka_group_id,
        )?,
        DeliveryEventsHandler::new(order_service.clone()),
        shutdown.clone(),
    ));

    let worker = Worker::new(
        outbox_repo,
        KafkaPublisher::new(&cfg.kafka_brokers)?,
        worker_config(&cfg),
    );
    tasks.push(tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    }));

    let metrics = Arc::new(HttpMetrics::new(Registry::new())?);
    let router = server::with_common_routes(server::order::router(order_service), metrics);
    Server::new(cfg.http_port, router).start().await?;

    shutdown.notify_waiters();
    drain_tasks(tasks, &cfg).await;
    Ok(())
}

/// Runs the payment service: the payment HTTP surface, the order-info
/// consumer and the outbox relay.
pub async fn run_payment_service() -> Result<()> {
    let (cfg, pool) = bootstrap("payment").await?;

    let transactor = Transactor::new(pool.clone());
    let outbox_repo = PgOutboxRepository::new(pool.clone());
    let payment_service = Arc::new(PaymentService::new(
        transactor.clone(),
        PgPaymentsRepository::new(),
        PgOrderInfoRepository::new(),
        outbox_repo.clone(),
        SimulatedGateway,
    ));

    let shutdown = Arc::new(Notify::new());
    let mut tasks = Vec::new();

    tasks.push(spawn_consumer(
        KafkaConsumer::new(
            &cfg.kafka_brokers,
            &cfg.kafka_topic_order_events,
            &cfg.kafka_group_id,
        )?,
        OrderInfoHandler::new(transactor, PgOrderInfoRepository::new()),
        shutdown.clone(),
    ));

    let worker = Worker::new(
        outbox_repo,
        KafkaPublisher::new(&cfg.kafka_brokers)?,
        worker_config(&cfg),
    );
    tasks.push(tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    }));

    let metrics = Arc::new(HttpMetrics::new(Registry::new())?);
    let router = server::with_common_routes(server::payment::router(payment_service), metrics);
    Server::new(cfg.http_port, router).start().await?;

    shutdown.notify_waiters();
    drain_tasks(tasks, &cfg).await;
    Ok(())
}

/// Runs the analytics service: the ingestion consumer and the read-only HTTP
/// surface.
pub async fn run_analytics_service() -> Result<()> {
    let (cfg, pool) = bootstrap("analytics").await?;

    let registry = Registry::new();
    let analytics_service = Arc::new(AnalyticsService::new(
        Transactor::new(pool.clone()),
        PgOrderEventsRepository::new(),
        AnalyticsMetrics::new(&registry)?,
    ));

    let shutdown = Arc::new(Notify::new());
    let mut tasks = Vec::new();

    tasks.push(spawn_consumer(
        KafkaConsumer::new(
            &cfg.kafka_brokers,
            &cfg.kafka_topic_order_events,
            &cfg.kafka_group_id,
        )?,
        AnalyticsIngestHandler::new(analytics_service.clone()),
        shutdown.clone(),
    ));

    let metrics = Arc::new(HttpMetrics::new(registry)?);
    let router = server::with_common_routes(server::analytics::router(analytics_service), metrics);
    Server::new(cfg.http_port, router).start().await?;

    shutdown.notify_waiters();
    drain_tasks(tasks, &cfg).await;
    Ok(())
}

fn worker_config(cfg: &AppConfig) -> WorkerConfig {
    WorkerConfig {
        topic: cfg.outbox_topic.clone(),
        batch_limit: cfg.outbox_batch_limit,
        requeue_batch_limit: cfg.outbox_requeue_batch_limit,
        interval: cfg.outbox_interval,
        requeue_interval: cfg.outbox_requeue_interval,
    }
}
