//! Database initialization, migration runner and the transaction seam.
//!
//! Provides `init_db_pool` for creating a connection pool with startup
//! retries, `run_migrations` for applying SQL files from a directory, and
//! [`Transactor`], the scope through which services open transactions so a
//! domain write and its outbox record share one commit.

use anyhow::{Context, Result};
use app_config::AppConfig;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Initializes the database connection pool.
///
/// Connection attempts are retried once per second until
/// `postgres_connect_timeout` elapses; failing every attempt is fatal for the
/// caller (the process is expected to exit).
///
/// # Errors
/// Returns an error if the URL cannot be parsed, the pool cannot be created
/// or no connection could be established within the timeout.
pub async fn init_db_pool(cfg: &AppConfig) -> Result<Pool> {
    let pg_config: PgConfig = cfg
        .postgres_url
        .parse()
        .context("Failed to parse Postgres URL")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(16)
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create database pool")?;

    let max_retries = cfg.postgres_connect_timeout.as_secs().max(1);
    let mut last_error = None;

    for attempt in 1..=max_retries {
        match pool.get().await {
            Ok(_) => {
                info!("Connected to database on attempt {attempt}");
                return Ok(pool);
            }
            Err(e) => {
                info!(
                    "Failed to connect to database (attempt {attempt}/{max_retries}), \
                     retrying in 1 second..."
                );
                last_error = Some(e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to get DB connection after {} attempts: {:?}",
        max_retries,
        last_error
    ))
}

/// Applies all SQL migrations from the given directory to the provided
/// database client, in file-name order.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<()> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .context("Failed to read migrations directory")?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        info!("Applying migration: {}", file_name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read migration file {file_name}"))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("Failed to execute migration {file_name}"))?;
    }
    Ok(())
}

/// Resolves the migrations directory for a service, trying the local checkout
/// layout first and the container layout second.
pub async fn find_migrations_dir(service: &str) -> Option<String> {
    for base in ["./migrations", "/app/migrations"] {
        let dir = format!("{base}/{service}");
        if fs::metadata(&dir).await.is_ok() {
            return Some(dir);
        }
    }
    None
}

/// The transaction scope of the engine.
///
/// Services obtain a pooled connection here and open a
/// `tokio_postgres::Transaction` on it; that transaction handle is then passed
/// into every repository call that must share the commit. Dropping the handle
/// without committing rolls the transaction back, which covers both the error
/// and the panic path.
#[derive(Clone)]
pub struct Transactor {
    pool: Pool,
}

impl Transactor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Checks out a connection; call `.transaction()` on it to open the scope.
    pub async fn conn(&self) -> Result<Object, PoolError> {
        self.pool.get().await
    }
}
