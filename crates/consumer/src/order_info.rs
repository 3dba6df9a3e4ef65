//! Payment-side capture of `order.created` events into the order-info window.

use anyhow::Result;
use async_trait::async_trait;
use db::Transactor;
use kafka_consumer::EventHandler;
use model::{Envelope, OrderInfo};
use repository::PgOrderInfoRepository;
use serde::Deserialize;
use tokio_postgres::Client;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedData {
    order_id: Uuid,
    user_id: Uuid,
    total_price: f64,
}

/// Upserts the order-info row that makes an order payable for 30 minutes.
pub struct OrderInfoHandler {
    transactor: Transactor,
    order_info: PgOrderInfoRepository,
}

impl OrderInfoHandler {
    pub fn new(transactor: Transactor, order_info: PgOrderInfoRepository) -> Self {
        Self {
            transactor,
            order_info,
        }
    }
}

#[async_trait]
impl EventHandler for OrderInfoHandler {
    async fn handle(&self, _key: &[u8], payload: &[u8]) -> Result<()> {
        let envelope: Envelope = match serde_json::from_slice(payload) {
            Ok(env) => env,
            Err(e) => {
                error!("failed to parse envelope: {e}");
                return Ok(());
            }
        };

        // Only the creation event opens a payment window.
        if envelope.event_type != "order.created" {
            return Ok(());
        }

        let data: CreatedData = match serde_json::from_value(envelope.data.clone()) {
            Ok(data) => data,
            Err(e) => {
                error!("failed to parse order.created payload: {e}");
                return Ok(());
            }
        };

        let info = OrderInfo {
            order_id: data.order_id,
            user_id: data.user_id,
            total_price: data.total_price,
            created_at: envelope.occurred_at,
        };

        let conn = self.transactor.conn().await?;
        let client: &Client = &conn;
        self.order_info.save(client, &info).await?;

        info!("order {} captured for payment", data.order_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
    use serde_json::json;
    use tokio_postgres::NoTls;

    // A pool that never connects: the tests below only exercise paths that
    // return before touching the database.
    fn dangling_transactor() -> Transactor {
        let mgr = Manager::from_config(
            tokio_postgres::Config::new(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Transactor::new(Pool::builder(mgr).max_size(1).build().unwrap())
    }

    #[tokio::test]
    async fn malformed_envelope_is_acknowledged() {
        let handler = OrderInfoHandler::new(dangling_transactor(), PgOrderInfoRepository::new());
        assert!(handler.handle(b"", b"{ not json").await.is_ok());
    }

    #[tokio::test]
    async fn other_event_types_are_acknowledged_without_effect() {
        let handler = OrderInfoHandler::new(dangling_transactor(), PgOrderInfoRepository::new());
        let env = Envelope::wrap("order.completed", json!({"orderId": Uuid::new_v4()}));
        let raw = serde_json::to_vec(&env).unwrap();
        assert!(handler.handle(b"order.completed", &raw).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_created_payload_is_acknowledged() {
        let handler = OrderInfoHandler::new(dangling_transactor(), PgOrderInfoRepository::new());
        let env = Envelope::wrap("order.created", json!({"orderId": "nope"}));
        let raw = serde_json::to_vec(&env).unwrap();
        assert!(handler.handle(b"order.created", &raw).await.is_ok());
    }
}
