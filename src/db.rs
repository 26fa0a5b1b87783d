//! Connection pool management for the control plane and tenant databases.

use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use tokio::time::sleep;

use crate::config::AppConfig;

/// Errors that can occur while opening the control-plane pool.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Pool sizing shared by every pool this crate opens.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_connections: cfg.db_max_connections,
            acquire_timeout: Duration::from_millis(cfg.db_acquire_timeout_ms),
        }
    }

    fn options(&self, url: &str) -> ConnectOptions {
        let mut opt = ConnectOptions::new(url);
        // SQLite files serialize writers; a single connection avoids SQLITE_BUSY.
        let max = if url.starts_with("sqlite:") {
            1
        } else {
            self.max_connections
        };
        opt.max_connections(max)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .sqlx_logging(true)
            .sqlx_logging_level(log::LevelFilter::Debug);
        opt
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens a single pool without retrying. Used for tenant databases, whose
/// failures are reported per tenant rather than retried.
pub async fn connect(url: &str, settings: PoolSettings) -> Result<DatabaseConnection, DbErr> {
    Database::connect(settings.options(url)).await
}

/// Opens the control-plane pool, retrying transient failures with exponential
/// backoff.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection, DatabaseError> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        });
    }

    let settings = PoolSettings::from_config(cfg);
    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    let mut attempt = 1;
    loop {
        match connect(&cfg.database_url, settings).await {
            Ok(conn) => {
                tracing::info!(attempt, "connected to control-plane database");
                return Ok(conn);
            }
            Err(err) if attempt >= max_retries => {
                tracing::error!(
                    error = %err,
                    attempts = max_retries,
                    "failed to connect to control-plane database"
                );
                return Err(DatabaseError::ConnectionFailed { source: err });
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    attempt,
                    retry_in = ?retry_delay,
                    "control-plane connection attempt failed"
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Verifies that a connection is still usable.
pub async fn health_check(db: &DatabaseConnection) -> Result<(), DbErr> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt).await?;
    Ok(())
}

/// True when the error means the database could not be reached at all, as
/// opposed to a statement failing on a live connection.
pub fn is_connectivity_error(err: &DbErr) -> bool {
    matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
}
