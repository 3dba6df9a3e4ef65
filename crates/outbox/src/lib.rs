//! Outbox relay worker.
//!
//! A background scheduler that moves committed-but-unpublished outbox records
//! onto the bus. Two timers drive it: the pending tick relays fresh records,
//! the requeue tick returns failed records to the pending set. The worker
//! only sees two seams - [`OutboxStore`] and [`EventPublisher`] - so both the
//! database and the broker can be swapped for in-memory fakes in tests.
//!
//! Delivery is at-least-once: a crash between a successful publish and the
//! mark-processed update republishes the record on the next tick, so every
//! consumer downstream must deduplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

/// A pending outbox record as seen by the worker: just enough to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Storage seam of the worker.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Selects up to `limit` pending records, oldest first, skipping rows
    /// locked by a concurrent worker instance.
    async fn fetch_pending(&self, limit: i64) -> anyhow::Result<Vec<PendingEvent>>;

    /// Marks the given records processed, stamping the processing time.
    async fn mark_processed(&self, ids: &[Uuid]) -> anyhow::Result<()>;

    /// Marks one record failed, keeping the publish error for operators.
    async fn mark_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()>;

    /// Returns up to `limit` failed records to the pending set and clears
    /// their processing stamp. Returns how many were requeued.
    async fn requeue_failed(&self, limit: i64) -> anyhow::Result<u64>;
}

/// Publisher seam of the worker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event to `topic`. Failure must be surfaced to the caller
    /// so the record can be marked failed.
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Timing and sizing knobs of one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Destination topic for every relayed record.
    pub topic: String,
    /// Max pending records per tick.
    pub batch_limit: i64,
    /// Max failed records per requeue tick.
    pub requeue_batch_limit: i64,
    /// Period of the pending tick.
    pub interval: Duration,
    /// Period of the requeue tick.
    pub requeue_interval: Duration,
}

/// The outbox relay worker.
pub struct Worker<S, P> {
    store: S,
    publisher: P,
    cfg: WorkerConfig,
}

impl<S: OutboxStore, P: EventPublisher> Worker<S, P> {
    pub fn new(store: S, publisher: P, cfg: WorkerConfig) -> Self {
        Self {
            store,
            publisher,
            cfg,
        }
    }

    /// Runs both tickers until the shutdown signal fires.
    ///
    /// A batch in flight when the signal arrives is finished before the
    /// worker returns.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut tick = tokio::time::interval(self.cfg.interval);
        let mut requeue_tick = tokio::time::interval(self.cfg.requeue_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => self.process_batch().await,
                _ = requeue_tick.tick() => self.requeue_failed().await,
                _ = shutdown.notified() => {
                    info!("OutboxWorker: shutting down");
                    return;
                }
            }
        }
    }

    /// One pending tick: fetch, publish sequentially, then flip statuses.
    async fn process_batch(&self) {
        let events = match self.store.fetch_pending(self.cfg.batch_limit).await {
            Ok(events) => events,
            Err(e) => {
                error!("OutboxWorker: failed to fetch pending records: {e}");
                return;
            }
        };

        if events.is_empty() {
            debug!("OutboxWorker: no pending records");
            return;
        }

        let mut processed_ids = Vec::with_capacity(events.len());

        for event in &events {
            match self
                .publisher
                .publish(&self.cfg.topic, &event.event_type, &event.payload)
                .await
            {
                Ok(()) => {
                    info!("OutboxWorker: published record {}", event.id);
                    processed_ids.push(event.id);
                }
                Err(e) => {
                    error!("OutboxWorker: failed to publish record {}: {e}", event.id);
                    if let Err(mark_err) =
                        self.store.mark_failed(event.id, &e.to_string()).await
                    {
                        error!(
                            "OutboxWorker: failed to mark record {} as failed: {mark_err}",
                            event.id
                        );
                    }
                }
            }
        }

        if !processed_ids.is_empty() {
            if let Err(e) = self.store.mark_processed(&processed_ids).await {
                error!("OutboxWorker: failed to mark records as processed: {e}");
            }
        }
    }

    /// One requeue tick: failed records become pending again.
    async fn requeue_failed(&self) {
        match self
            .store
            .requeue_failed(self.cfg.requeue_batch_limit)
            .await
        {
            Ok(0) => {}
            Ok(n) => info!("OutboxWorker: requeued {n} failed records"),
            Err(e) => error!("OutboxWorker: failed to requeue records: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        pending: Mutex<Vec<PendingEvent>>,
        processed: Mutex<Vec<Uuid>>,
        failed: Mutex<Vec<(Uuid, String)>>,
    }

    impl FakeStore {
        fn with_pending(events: Vec<PendingEvent>) -> Self {
            Self {
                pending: Mutex::new(events),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl OutboxStore for FakeStore {
        async fn fetch_pending(&self, limit: i64) -> anyhow::Result<Vec<PendingEvent>> {
            let pending = self.pending.lock().unwrap();
            Ok(pending.iter().take(limit as usize).cloned().collect())
        }

        async fn mark_processed(&self, ids: &[Uuid]) -> anyhow::Result<()> {
            self.processed.lock().unwrap().extend_from_slice(ids);
            self.pending
                .lock()
                .unwrap()
                .retain(|e| !ids.contains(&e.id));
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
            self.failed.lock().unwrap().push((id, error.to_string()));
            self.pending.lock().unwrap().retain(|e| e.id != id);
            Ok(())
        }

        async fn requeue_failed(&self, limit: i64) -> anyhow::Result<u64> {
            let mut failed = self.failed.lock().unwrap();
            let n = failed.len().min(limit as usize);
            for (id, _) in failed.drain(..n) {
                self.pending.lock().unwrap().push(PendingEvent {
                    id,
                    event_type: "order.created".into(),
                    payload: json!({}),
                });
            }
            Ok(n as u64)
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        published: Mutex<Vec<(String, String)>>,
        fail_types: HashSet<String>,
    }

    #[async_trait]
    impl EventPublisher for FakePublisher {
        async fn publish(
            &self,
            topic: &str,
            event_type: &str,
            _payload: &serde_json::Value,
        ) -> anyhow::Result<()> {
            if self.fail_types.contains(event_type) {
                anyhow::bail!("broker unavailable");
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), event_type.to_string()));
            Ok(())
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            topic: "order.events".into(),
            batch_limit: 10,
            requeue_batch_limit: 10,
            interval: Duration::from_millis(10),
            requeue_interval: Duration::from_millis(10),
        }
    }

    fn event(event_type: &str) -> PendingEvent {
        PendingEvent {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload: json!({"orderId": Uuid::new_v4()}),
        }
    }

    #[tokio::test]
    async fn batch_is_published_and_marked_processed() {
        let events = vec![event("order.created"), event("order.paid")];
        let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let worker = Worker::new(
            FakeStore::with_pending(events),
            FakePublisher::default(),
            config(),
        );

        worker.process_batch().await;

        assert_eq!(*worker.store.processed.lock().unwrap(), ids);
        assert!(worker.store.failed.lock().unwrap().is_empty());
        let published = worker.publisher.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], ("order.events".into(), "order.created".into()));
    }

    #[tokio::test]
    async fn publish_failure_marks_only_that_record_failed() {
        let good = event("order.created");
        let bad = event("order.cancelled");
        let good_id = good.id;
        let bad_id = bad.id;

        let publisher = FakePublisher {
            fail_types: HashSet::from(["order.cancelled".to_string()]),
            ..Default::default()
        };
        let worker = Worker::new(FakeStore::with_pending(vec![good, bad]), publisher, config());

        worker.process_batch().await;

        assert_eq!(*worker.store.processed.lock().unwrap(), vec![good_id]);
        let failed = worker.store.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, bad_id);
        assert!(failed[0].1.contains("broker unavailable"));
    }

    #[tokio::test]
    async fn batch_limit_bounds_one_tick() {
        let events: Vec<_> = (0..5).map(|_| event("order.created")).collect();
        let mut cfg = config();
        cfg.batch_limit = 3;
        let worker = Worker::new(
            FakeStore::with_pending(events),
            FakePublisher::default(),
            cfg,
        );

        worker.process_batch().await;

        assert_eq!(worker.store.processed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_records_get_requeued_and_republished() {
        let publisher = FakePublisher {
            fail_types: HashSet::from(["order.created".to_string()]),
            ..Default::default()
        };
        let worker = Worker::new(
            FakeStore::with_pending(vec![event("order.created")]),
            publisher,
            config(),
        );

        worker.process_batch().await;
        assert_eq!(worker.store.failed.lock().unwrap().len(), 1);

        worker.requeue_failed().await;
        assert!(worker.store.failed.lock().unwrap().is_empty());
        assert_eq!(worker.store.pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_the_run_loop() {
        let worker = Arc::new(Worker::new(
            FakeStore::default(),
            FakePublisher::default(),
            config(),
        ));
        let shutdown = Arc::new(Notify::new());

        let handle = {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.notify_waiters();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker must stop on shutdown")
            .unwrap();
    }
}
