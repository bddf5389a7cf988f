//! Postgres connection pool.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// Type alias for the Postgres pool used across the whole application.
pub type DbPool = PgPool;

const DEFAULT_MAX_CONNECTIONS: u32 = 2;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

/// Create a new connection pool and open its first connection.
///
/// Fails fast if the server is unreachable or rejects the credentials.
pub async fn create_pool(options: PgConnectOptions, config: &PoolConfig) -> Result<DbPool, DbError> {
    info!(
        "Connecting to database {}:{} (max_connections={})",
        options.get_host(),
        options.get_port(),
        config.max_connections
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Close every connection in the pool and wait for them to finish.
pub async fn close_pool(pool: &DbPool) {
    pool.close().await;
    info!("Database connections closed");
}
