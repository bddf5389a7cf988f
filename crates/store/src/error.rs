//! Store-level error type.

use thiserror::Error;

/// Errors returned by a [`MigrationStore`](crate::MigrationStore) operation.
///
/// The runner uses the variant to classify a failure:
/// - `Connectivity` — the store could not be reached; nothing was changed.
/// - `Statement`    — the store rejected a statement (bad SQL, schema conflict,
///                    constraint violation).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is unreachable or the connection dropped.
    #[error("store unreachable: {0}")]
    Connectivity(String),

    /// The store rejected the statement.
    #[error("statement rejected: {0}")]
    Statement(String),
}

impl StoreError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
