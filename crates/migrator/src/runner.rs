//! Migration runner.
//!
//! `MigrationRunner` is the central orchestrator:
//! 1. Takes the advisory lock, polling with exponential back-off until
//!    `lock_timeout` elapses.
//! 2. Bootstraps the record table (the "version 0" migration).
//! 3. Reads applied records and plans the pending list.
//! 4. Applies each pending migration inside its own isolation boundary,
//!    inserting its record in the same boundary before committing.
//! 5. Stops at the first failure, rolls that migration back, and releases
//!    the lock on every exit path.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use store::{MigrationRecord, MigrationStore, StoreError};

use crate::error::BOOTSTRAP_VERSION;
use crate::plan::{pending_migrations, unknown_versions};
use crate::{Migration, MigrationError, MigrationSet, MigrationState, MigrationStatus, StatusReport};

/// Number of migrations applied by one [`MigrationRunner::apply_pending`] call.
/// Zero means the store was already up to date.
pub type AppliedCount = usize;

/// Advisory lock key shared by every runner instance ("REFRANGE" in ASCII).
pub const DEFAULT_LOCK_KEY: i64 = 0x5245_4652_414e_4745;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Advisory lock key; runners only exclude each other when keys match.
    pub lock_key: i64,
    /// Give up on the advisory lock after this long.
    pub lock_timeout: Duration,
    /// Base delay for exponential back-off between lock attempts.
    pub lock_retry_base_delay: Duration,
    /// Upper bound on a single back-off delay.
    pub lock_retry_max_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY,
            lock_timeout: Duration::from_secs(30),
            lock_retry_base_delay: Duration::from_millis(50),
            lock_retry_max_delay: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// MigrationRunner
// ---------------------------------------------------------------------------

/// Stateless orchestrator; the store handle is passed into every call.
#[derive(Debug, Clone, Default)]
pub struct MigrationRunner {
    config: RunnerConfig,
}

impl MigrationRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Apply every migration in `set` that the store has not recorded yet.
    ///
    /// # Errors
    /// Returns `MigrationError` for an unreachable store, a rejected
    /// statement, an inconsistent history, or a lock timeout. Migrations
    /// committed before the failure stay applied.
    #[instrument(skip_all, fields(lock_key = self.config.lock_key, known = set.len()))]
    pub async fn apply_pending<S>(
        &self,
        store: &mut S,
        set: &MigrationSet,
    ) -> Result<AppliedCount, MigrationError>
    where
        S: MigrationStore + ?Sized,
    {
        self.acquire_lock(store).await?;

        let result = self.apply_locked(store, set).await;

        if let Err(err) = store.unlock(self.config.lock_key).await {
            warn!("failed to release migration lock {}: {}", self.config.lock_key, err);
        }

        result
    }

    /// Report which migrations in `set` are applied and which are pending.
    ///
    /// Read-only: does not take the advisory lock and never creates the
    /// record table. A store without one reports everything as pending.
    #[instrument(skip_all, fields(known = set.len()))]
    pub async fn status<S>(
        &self,
        store: &mut S,
        set: &MigrationSet,
    ) -> Result<StatusReport, MigrationError>
    where
        S: MigrationStore + ?Sized,
    {
        let has_table = store.has_record_table().await.map_err(|e| {
            MigrationError::from_store(e, "record table lookup", BOOTSTRAP_VERSION, "record table lookup")
        })?;
        let applied = if has_table {
            read_records(store).await?
        } else {
            debug!("record table does not exist yet");
            Vec::new()
        };
        let by_version: HashMap<i64, &MigrationRecord> =
            applied.iter().map(|r| (r.version, r)).collect();

        let migrations = set
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name.clone(),
                state: match by_version.get(&m.version) {
                    Some(record) => MigrationState::Applied { applied_at: record.applied_at },
                    None => MigrationState::Pending,
                },
            })
            .collect();

        Ok(StatusReport { migrations, unknown_applied: unknown_versions(set, &applied) })
    }

    // -----------------------------------------------------------------------
    // Internal: the locked section.
    // -----------------------------------------------------------------------

    async fn apply_locked<S>(
        &self,
        store: &mut S,
        set: &MigrationSet,
    ) -> Result<AppliedCount, MigrationError>
    where
        S: MigrationStore + ?Sized,
    {
        let applied = read_history(store).await?;

        let unknown = unknown_versions(set, &applied);
        if !unknown.is_empty() {
            warn!("store has applied versions unknown to this build: {:?}", unknown);
        }

        let pending = pending_migrations(set, &applied)?;
        if pending.is_empty() {
            info!("database is up to date ({} migrations applied)", applied.len());
            return Ok(0);
        }

        info!(
            "{} pending migrations: {:?}",
            pending.len(),
            pending.iter().map(|m| m.version).collect::<Vec<_>>()
        );

        for migration in &pending {
            self.apply_one(store, migration).await?;
        }

        Ok(pending.len())
    }

    #[instrument(skip_all, fields(version = migration.version, name = %migration.name))]
    async fn apply_one<S>(&self, store: &mut S, migration: &Migration) -> Result<(), MigrationError>
    where
        S: MigrationStore + ?Sized,
    {
        let started = Instant::now();

        store
            .begin()
            .await
            .map_err(|e| MigrationError::from_store(e, "begin", migration.version, &migration.name))?;

        if let Err(err) = run_in_boundary(store, migration).await {
            if let Err(rollback_err) = store.rollback().await {
                error!("rollback of migration {} failed: {}", migration.version, rollback_err);
            }
            error!(
                "migration {} ({}) failed and was rolled back: {}",
                migration.version, migration.name, err
            );
            return Err(MigrationError::from_store(err, "migration", migration.version, &migration.name));
        }

        info!(
            "applied migration {} ({}) in {:?}",
            migration.version,
            migration.name,
            started.elapsed()
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: advisory lock with bounded wait.
    // -----------------------------------------------------------------------

    async fn acquire_lock<S>(&self, store: &mut S) -> Result<(), MigrationError>
    where
        S: MigrationStore + ?Sized,
    {
        let key = self.config.lock_key;
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            let acquired = store.try_lock(key).await.map_err(|e| {
                MigrationError::from_store(e, "lock acquisition", BOOTSTRAP_VERSION, "advisory lock")
            })?;
            if acquired {
                debug!("acquired migration lock {} after {} retries", key, attempts);
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_timeout {
                return Err(MigrationError::LockTimeout { key, waited });
            }

            attempts += 1;
            let delay = self
                .config
                .lock_retry_base_delay
                .saturating_mul(2u32.saturating_pow(attempts - 1))
                .min(self.config.lock_retry_max_delay)
                .min(self.config.lock_timeout - waited);

            warn!(
                "migration lock {} is held by another runner (attempt {}), retrying in {:?}",
                key, attempts, delay
            );

            tokio::time::sleep(delay).await;
        }
    }
}

/// Bootstrap the record table and read what it holds.
async fn read_history<S>(store: &mut S) -> Result<Vec<MigrationRecord>, MigrationError>
where
    S: MigrationStore + ?Sized,
{
    store.ensure_record_table().await.map_err(|e| {
        MigrationError::from_store(e, "record table bootstrap", BOOTSTRAP_VERSION, "record table bootstrap")
    })?;

    read_records(store).await
}

async fn read_records<S>(store: &mut S) -> Result<Vec<MigrationRecord>, MigrationError>
where
    S: MigrationStore + ?Sized,
{
    store.applied_records().await.map_err(|e| {
        MigrationError::from_store(e, "reading applied migrations", BOOTSTRAP_VERSION, "applied migration records")
    })
}

/// Body, record, commit. The caller rolls back if any step fails.
async fn run_in_boundary<S>(store: &mut S, migration: &Migration) -> Result<(), StoreError>
where
    S: MigrationStore + ?Sized,
{
    store.execute(&migration.body).await?;

    let record = MigrationRecord {
        version: migration.version,
        name: migration.name.clone(),
        applied_at: Utc::now(),
    };
    store.insert_record(&record).await?;

    store.commit().await
}
