//! Typed error type for the db crate.

use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("invalid database configuration: {0}")]
    Config(String),
}

/// SQLSTATE classes that mean the connection itself is gone.
const CONNECTION_EXCEPTION_CLASS: &str = "08";
const ADMIN_SHUTDOWN: &str = "57P01";
const CRASH_SHUTDOWN: &str = "57P02";
const CANNOT_CONNECT_NOW: &str = "57P03";

/// Classify a sqlx error for the migration runner.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    let connectivity = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code.starts_with(CONNECTION_EXCEPTION_CLASS)
                || code == ADMIN_SHUTDOWN
                || code == CRASH_SHUTDOWN
                || code == CANNOT_CONNECT_NOW
        }),
        _ => false,
    };

    if connectivity {
        StoreError::Connectivity(err.to_string())
    } else {
        StoreError::Statement(err.to_string())
    }
}
