//! Row structs that map onto database tables.
//!
//! These are *persistence* models; the runner works with
//! [`store::MigrationRecord`].

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use store::MigrationRecord;

/// A row of the migration record table.
#[derive(Debug, Clone, FromRow)]
pub struct MigrationRecordRow {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

impl From<MigrationRecordRow> for MigrationRecord {
    fn from(row: MigrationRecordRow) -> Self {
        Self { version: row.version, name: row.name, applied_at: row.applied_at }
    }
}
