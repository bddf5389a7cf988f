//! `store` crate — the `MigrationStore` trait and an in-memory test double.
//!
//! The migration runner never talks to a database directly; every backend
//! (PostgreSQL in the `db` crate, [`mock::MemoryStore`] in tests) implements
//! [`MigrationStore`].

pub mod error;
pub mod traits;
pub mod mock;

pub use error::StoreError;
pub use traits::{MigrationRecord, MigrationStore};
