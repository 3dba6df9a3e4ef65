//! # Data Repository Layer
//!
//! PostgreSQL repositories for the order, payment and analytics services.
//! Repositories are stateless: every operation takes an executor (`Client` or
//! `Transaction` via [`tokio_postgres::GenericClient`]), so a service decides
//! which calls share one commit by passing the same transaction handle.
//! The outbox repository additionally owns a pool because the relay worker
//! drives it outside any request scope.

use thiserror::Error;
use tokio_postgres::error::SqlState;

pub mod order_events;
pub mod order_info;
pub mod orders;
pub mod outbox_store;
pub mod payments;

pub use order_events::PgOrderEventsRepository;
pub use order_info::PgOrderInfoRepository;
pub use orders::PgOrdersRepository;
pub use outbox_store::PgOutboxRepository;
pub use payments::PgPaymentsRepository;

/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error.
    #[error("Database error: {0}")]
    Db(tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A uniqueness constraint rejected the write.
    #[error("Already exists")]
    AlreadyExists,
    /// A stored row could not be mapped back onto the domain model.
    #[error("Corrupt row: {0}")]
    Decode(String),
}

impl From<tokio_postgres::Error> for RepositoryError {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db) if *db.code() == SqlState::UNIQUE_VIOLATION => RepositoryError::AlreadyExists,
            _ => RepositoryError::Db(e),
        }
    }
}
