//! Migration-level error types.

use std::path::PathBuf;
use std::time::Duration;

use store::StoreError;
use thiserror::Error;

/// Errors produced while loading or applying migrations.
///
/// Every variant is fatal to the current run; nothing is retried.
#[derive(Debug, Error)]
pub enum MigrationError {
    // ------ Store errors ------

    /// The store could not be reached. Nothing was changed by the failing step.
    ///
    /// `version` is 0 when the failure happened outside any migration.
    #[error("store unreachable during {stage} (migration {version}, {name}): {source}")]
    Connectivity {
        stage: &'static str,
        version: i64,
        name: String,
        #[source]
        source: StoreError,
    },

    /// A statement was rejected. Migrations applied before this one stay applied.
    #[error("migration {version} ({name}) failed: {source}")]
    Statement {
        version: i64,
        name: String,
        #[source]
        source: StoreError,
    },

    /// A pending migration sorts below a migration that is already applied.
    #[error(
        "migration {version} ({name}) is pending but version {highest_applied} is already applied; \
         the migration history needs manual repair"
    )]
    OutOfOrder {
        version: i64,
        name: String,
        highest_applied: i64,
    },

    /// Another runner held the advisory lock for the whole bounded wait.
    #[error("could not acquire migration lock {key} within {waited:?}")]
    LockTimeout { key: i64, waited: Duration },

    // ------ Source errors ------

    /// The migration set itself is malformed.
    #[error("invalid migration set: {0}")]
    InvalidSet(String),

    /// The migration directory or one of its files could not be read.
    #[error("failed to read migrations from {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Version reported for failures outside any migration: the lock and the
/// record table bootstrap.
pub(crate) const BOOTSTRAP_VERSION: i64 = 0;

impl MigrationError {
    /// Classify a store failure that happened while working on `version`.
    pub(crate) fn from_store(
        err: StoreError,
        stage: &'static str,
        version: i64,
        name: &str,
    ) -> Self {
        if err.is_connectivity() {
            Self::Connectivity { stage, version, name: name.to_owned(), source: err }
        } else {
            Self::Statement { version, name: name.to_owned(), source: err }
        }
    }
}
