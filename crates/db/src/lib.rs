//! `db` crate — PostgreSQL persistence for the migration runner.
//!
//! Provides connection configuration from the environment, a connection
//! pool, and [`PgMigrationStore`], the sqlx-backed
//! [`store::MigrationStore`]. No migration logic lives here.

pub mod config;
pub mod error;
pub mod models;
pub mod pg_store;
pub mod pool;

pub use config::{connect_options, DatabaseConfig};
pub use error::DbError;
pub use pg_store::{PgMigrationStore, DEFAULT_RECORD_TABLE};
pub use pool::{DbPool, PoolConfig};
