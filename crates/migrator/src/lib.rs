//! `migrator` crate — migration models, planning, directory discovery, and
//! the runner that applies pending migrations to a [`store::MigrationStore`].

pub mod models;
pub mod error;
pub mod plan;
pub mod source;
pub mod runner;
mod sql;

pub use models::{Migration, MigrationSet, MigrationState, MigrationStatus, StatusReport};
pub use error::MigrationError;
pub use plan::pending_migrations;
pub use source::load_dir;
pub use runner::{AppliedCount, MigrationRunner, RunnerConfig};

#[cfg(test)]
mod runner_tests;
