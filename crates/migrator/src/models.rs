//! Core domain models for migrations.
//!
//! A [`MigrationSet`] is the source of truth for which schema changes exist;
//! the store only remembers which of them were applied.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sql::transaction_control;
use crate::MigrationError;

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// A named, versioned unit of schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Unique, strictly increasing within a set. Version 0 is reserved for
    /// the record table bootstrap.
    pub version: i64,
    pub name: String,
    /// One or more `;`-separated SQL statements.
    pub body: String,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self { version, name: name.into(), body: body.into() }
    }
}

// ---------------------------------------------------------------------------
// MigrationSet
// ---------------------------------------------------------------------------

/// All known migrations, ordered by version ascending.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set from migrations already in ascending order.
    ///
    /// # Errors
    /// [`MigrationError::InvalidSet`] if a version is below 1, versions are
    /// not strictly increasing, or a body opens or closes its own transaction.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut previous: Option<&Migration> = None;
        for migration in &migrations {
            if migration.version < 1 {
                return Err(MigrationError::InvalidSet(format!(
                    "migration '{}' has version {}; versions start at 1",
                    migration.name, migration.version
                )));
            }
            if let Some(prev) = previous {
                if migration.version == prev.version {
                    return Err(MigrationError::InvalidSet(format!(
                        "version {} is used by both '{}' and '{}'",
                        migration.version, prev.name, migration.name
                    )));
                }
                if migration.version < prev.version {
                    return Err(MigrationError::InvalidSet(format!(
                        "version {} ('{}') follows version {} ('{}')",
                        migration.version, migration.name, prev.version, prev.name
                    )));
                }
            }
            if let Some(statement) = transaction_control(&migration.body) {
                return Err(MigrationError::InvalidSet(format!(
                    "migration {} ('{}') contains `{statement}`; every migration already runs in its own transaction",
                    migration.version, migration.name
                )));
            }
            previous = Some(migration);
        }
        Ok(Self { migrations })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn latest_version(&self) -> Option<i64> {
        self.migrations.last().map(|m| m.version)
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Applied { applied_at: DateTime<Utc> },
    Pending,
}

/// Where a single known migration stands against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Result of [`MigrationRunner::status`](crate::MigrationRunner::status).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    /// One entry per migration in the set, in version order.
    pub migrations: Vec<MigrationStatus>,
    /// Versions recorded in the store that the set does not know about.
    pub unknown_applied: Vec<i64>,
}

impl StatusReport {
    pub fn pending_count(&self) -> usize {
        self.migrations
            .iter()
            .filter(|m| m.state == MigrationState::Pending)
            .count()
    }
}
