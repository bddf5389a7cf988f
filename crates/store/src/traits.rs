//! The `MigrationStore` trait: the capability the runner needs from a store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Durable proof that a migration version has been applied.
///
/// Defined here (in the store crate) so both the runner and individual store
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// A handle to a persistent store that migrations are applied to.
///
/// One handle represents one session: the advisory lock and the open
/// isolation boundary both belong to the handle that acquired them.
#[async_trait]
pub trait MigrationStore: Send {
    /// Create the migration record table if it does not exist yet.
    /// Must be safe to call repeatedly.
    async fn ensure_record_table(&mut self) -> Result<(), StoreError>;

    /// Whether the record table exists. Never creates it.
    async fn has_record_table(&mut self) -> Result<bool, StoreError>;

    /// Every record currently in the record table, in any order.
    async fn applied_records(&mut self) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Try to take the advisory lock identified by `key` without blocking.
    ///
    /// Returns `Ok(false)` if another session holds it.
    async fn try_lock(&mut self, key: i64) -> Result<bool, StoreError>;

    /// Release the advisory lock identified by `key`.
    async fn unlock(&mut self, key: i64) -> Result<(), StoreError>;

    /// Open an isolation boundary.
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Execute a migration body (one or more `;`-separated statements).
    async fn execute(&mut self, sql: &str) -> Result<(), StoreError>;

    /// Insert a record row. Called inside the boundary that applied the body.
    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
