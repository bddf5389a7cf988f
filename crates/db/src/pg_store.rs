//! `PgMigrationStore` — the PostgreSQL implementation of `MigrationStore`.
//!
//! Advisory locks are session-scoped, so the store pins one pooled
//! connection for its whole lifetime and runs everything on it, including
//! the `BEGIN`/`COMMIT`/`ROLLBACK` of each migration boundary.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, Postgres};
use tracing::{debug, warn};

use store::{MigrationRecord, MigrationStore, StoreError};

use crate::error::store_error;
use crate::models::MigrationRecordRow;
use crate::{DbError, DbPool};

/// Default name of the table that records applied migrations.
pub const DEFAULT_RECORD_TABLE: &str = "migration_records";

/// Postgres identifiers are truncated beyond this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

pub struct PgMigrationStore {
    conn: PoolConnection<Postgres>,
    record_table: String,
}

impl PgMigrationStore {
    /// Take a connection from `pool` and bind it to `record_table`.
    ///
    /// `record_table` may be schema-qualified (`schema.table`); each part must
    /// be a plain SQL identifier because it is spliced into statements.
    pub async fn acquire(pool: &DbPool, record_table: &str) -> Result<Self, DbError> {
        validate_table_name(record_table)?;
        let conn = pool.acquire().await?;
        debug!("migration store bound to table {record_table}");
        Ok(Self { conn, record_table: record_table.to_owned() })
    }

    pub fn record_table(&self) -> &str {
        &self.record_table
    }

    /// Close the pinned connection instead of returning it to the pool, so
    /// nothing session-scoped can outlive the run.
    pub async fn close(self) -> Result<(), DbError> {
        self.conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn ensure_record_table(&mut self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version     BIGINT      PRIMARY KEY,
                name        TEXT        NOT NULL,
                applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.record_table
        );
        (&mut *self.conn).execute(sql.as_str()).await.map_err(store_error)?;
        Ok(())
    }

    async fn has_record_table(&mut self) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(&self.record_table)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(store_error)
    }

    async fn applied_records(&mut self) -> Result<Vec<MigrationRecord>, StoreError> {
        let sql = format!(
            "SELECT version, name, applied_at FROM {} ORDER BY version",
            self.record_table
        );
        let rows = sqlx::query_as::<_, MigrationRecordRow>(&sql)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(MigrationRecord::from).collect())
    }

    async fn try_lock(&mut self, key: i64) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(store_error)
    }

    async fn unlock(&mut self, key: i64) -> Result<(), StoreError> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(store_error)?;
        if !released {
            warn!("advisory lock {key} was not held by this session");
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        (&mut *self.conn).execute("BEGIN").await.map_err(store_error)?;
        Ok(())
    }

    // An unbound `&str` goes over the simple query protocol, which accepts
    // several `;`-separated statements.
    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        (&mut *self.conn).execute(sql).await.map_err(store_error)?;
        Ok(())
    }

    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (version, name, applied_at) VALUES ($1, $2, $3)",
            self.record_table
        );
        sqlx::query(&sql)
            .bind(record.version)
            .bind(&record.name)
            .bind(record.applied_at)
            .execute(&mut *self.conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        (&mut *self.conn).execute("COMMIT").await.map_err(store_error)?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        (&mut *self.conn).execute("ROLLBACK").await.map_err(store_error)?;
        Ok(())
    }
}

/// Accept `table` or `schema.table` made of plain identifiers.
fn validate_table_name(name: &str) -> Result<(), DbError> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        part.len() <= MAX_IDENTIFIER_LEN
            && chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|part| valid_part(part)) {
        Ok(())
    } else {
        Err(DbError::Config(format!(
            "record table '{name}' must be an identifier like migration_records or schema.migration_records"
        )))
    }
}
