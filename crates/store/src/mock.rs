//! `MemoryStore` — an in-memory test double for `MigrationStore`.
//!
//! Several handles can share one store (see [`MemoryStore::session`]) so
//! tests can model multiple runners racing on the same database. Committed
//! statements are kept verbatim; there is no SQL interpretation beyond
//! splitting a body on `;`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::warn;

use crate::{MigrationRecord, MigrationStore, StoreError};

#[derive(Debug, Default)]
struct Shared {
    table_exists: bool,
    records: Vec<MigrationRecord>,
    /// Statements that made it through a commit (or ran outside a boundary).
    schema: Vec<String>,
    lock_holder: Option<u64>,
    lock_acquisitions: usize,
    next_session: u64,
}

#[derive(Debug, Default)]
struct OpenBoundary {
    statements: Vec<String>,
    records: Vec<MigrationRecord>,
}

/// An in-memory store that records every committed statement and record.
#[derive(Debug)]
pub struct MemoryStore {
    session: u64,
    shared: Arc<Mutex<Shared>>,
    boundary: Option<OpenBoundary>,
    faults: Faults,
    disconnected: bool,
}

/// Failures injected into a single session.
#[derive(Debug, Clone, Default)]
struct Faults {
    /// Any statement containing this text is rejected.
    statement: Option<String>,
    /// Any statement containing this text loses the connection.
    disconnect: Option<String>,
    /// Inserting the record for this version is rejected.
    insert: Option<i64>,
    /// Committing a boundary that holds this version's record is rejected.
    commit: Option<i64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with a single session.
    pub fn new() -> Self {
        let shared = Shared { next_session: 2, ..Shared::default() };
        Self {
            session: 1,
            shared: Arc::new(Mutex::new(shared)),
            boundary: None,
            faults: Faults::default(),
            disconnected: false,
        }
    }

    /// Create a store whose every operation fails with a connectivity error.
    pub fn disconnected() -> Self {
        let mut store = Self::new();
        store.disconnected = true;
        store
    }

    /// Open another session on the same underlying store.
    pub fn session(&self) -> Self {
        let session = {
            let mut shared = self.shared();
            let id = shared.next_session;
            shared.next_session += 1;
            id
        };
        Self {
            session,
            shared: Arc::clone(&self.shared),
            boundary: None,
            faults: Faults::default(),
            disconnected: false,
        }
    }

    /// Reject any statement containing `needle` with a statement error.
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.faults.statement = Some(needle.into());
        self
    }

    /// Fail any statement containing `needle` with a connectivity error.
    pub fn disconnecting_on(mut self, needle: impl Into<String>) -> Self {
        self.faults.disconnect = Some(needle.into());
        self
    }

    /// Reject the record insert for `version`.
    pub fn failing_insert_on(mut self, version: i64) -> Self {
        self.faults.insert = Some(version);
        self
    }

    /// Reject the commit of the boundary that applies `version`.
    pub fn failing_commit_on(mut self, version: i64) -> Self {
        self.faults.commit = Some(version);
        self
    }

    /// Stop injecting failures.
    pub fn clear_failure(&mut self) {
        self.faults = Faults::default();
    }

    /// Insert a record directly, bypassing any boundary. Creates the record
    /// table if needed. Used to stage a pre-existing migration history.
    pub fn seed_record(&self, record: MigrationRecord) {
        let mut shared = self.shared();
        shared.table_exists = true;
        shared.records.push(record);
    }

    /// Versions recorded as applied, ascending.
    pub fn applied_versions(&self) -> Vec<i64> {
        let mut versions: Vec<i64> = self.shared().records.iter().map(|r| r.version).collect();
        versions.sort_unstable();
        versions
    }

    /// Committed statements in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.shared().schema.clone()
    }

    /// Whether any committed statement contains `needle`.
    pub fn has_statement(&self, needle: &str) -> bool {
        self.shared().schema.iter().any(|s| s.contains(needle))
    }

    pub fn record_table_exists(&self) -> bool {
        self.shared().table_exists
    }

    /// Session id of this handle.
    pub fn session_id(&self) -> u64 {
        self.session
    }

    /// Session currently holding the advisory lock, if any.
    pub fn lock_holder(&self) -> Option<u64> {
        self.shared().lock_holder
    }

    /// Number of times the advisory lock has been granted.
    pub fn lock_acquisitions(&self) -> usize {
        self.shared().lock_acquisitions
    }

    pub fn in_boundary(&self) -> bool {
        self.boundary.is_some()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    fn check_connected(&self) -> Result<(), StoreError> {
        if self.disconnected {
            return Err(StoreError::Connectivity("connection refused".into()));
        }
        Ok(())
    }

    fn check_statement(&self, statement: &str) -> Result<(), StoreError> {
        if let Some(needle) = &self.faults.disconnect {
            if statement.contains(needle.as_str()) {
                return Err(StoreError::Connectivity("connection reset by peer".into()));
            }
        }
        match &self.faults.statement {
            Some(needle) if statement.contains(needle.as_str()) => Err(StoreError::Statement(
                format!("injected failure on statement: {statement}"),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_record_table(&mut self) -> Result<(), StoreError> {
        self.check_connected()?;
        self.shared().table_exists = true;
        Ok(())
    }

    async fn has_record_table(&mut self) -> Result<bool, StoreError> {
        self.check_connected()?;
        Ok(self.shared().table_exists)
    }

    async fn applied_records(&mut self) -> Result<Vec<MigrationRecord>, StoreError> {
        self.check_connected()?;
        let shared = self.shared();
        if !shared.table_exists {
            return Err(StoreError::Statement("record table does not exist".into()));
        }
        Ok(shared.records.clone())
    }

    async fn try_lock(&mut self, _key: i64) -> Result<bool, StoreError> {
        self.check_connected()?;
        let mut shared = self.shared();
        match shared.lock_holder {
            None => {
                shared.lock_holder = Some(self.session);
                shared.lock_acquisitions += 1;
                Ok(true)
            }
            Some(holder) => Ok(holder == self.session),
        }
    }

    async fn unlock(&mut self, key: i64) -> Result<(), StoreError> {
        self.check_connected()?;
        let mut shared = self.shared();
        if shared.lock_holder == Some(self.session) {
            shared.lock_holder = None;
        } else {
            warn!(session = self.session, key, "unlock requested for a lock this session does not hold");
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        self.check_connected()?;
        if self.boundary.is_some() {
            return Err(StoreError::Statement("transaction already in progress".into()));
        }
        self.boundary = Some(OpenBoundary::default());
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.check_connected()?;
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            self.check_statement(statement)?;
            match self.boundary.as_mut() {
                Some(boundary) => boundary.statements.push(statement.to_owned()),
                None => lock(&self.shared).schema.push(statement.to_owned()),
            }
        }
        Ok(())
    }

    async fn insert_record(&mut self, record: &MigrationRecord) -> Result<(), StoreError> {
        self.check_connected()?;
        if self.faults.insert == Some(record.version) {
            return Err(StoreError::Statement(format!(
                "injected failure inserting record {}",
                record.version
            )));
        }
        let mut shared = lock(&self.shared);
        if !shared.table_exists {
            return Err(StoreError::Statement("record table does not exist".into()));
        }
        let staged = self.boundary.as_ref().map(|b| b.records.as_slice()).unwrap_or_default();
        let duplicate = shared
            .records
            .iter()
            .chain(staged)
            .any(|r| r.version == record.version);
        if duplicate {
            return Err(StoreError::Statement(format!(
                "duplicate key value violates unique constraint: version={}",
                record.version
            )));
        }
        match self.boundary.as_mut() {
            Some(boundary) => boundary.records.push(record.clone()),
            None => shared.records.push(record.clone()),
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.check_connected()?;
        let boundary = self
            .boundary
            .take()
            .ok_or_else(|| StoreError::Statement("no transaction in progress".into()))?;
        // A failed COMMIT ends the transaction without publishing anything.
        if let Some(version) = self.faults.commit {
            if boundary.records.iter().any(|r| r.version == version) {
                return Err(StoreError::Statement(format!(
                    "injected failure committing version {version}"
                )));
            }
        }
        let mut shared = self.shared();
        shared.schema.extend(boundary.statements);
        shared.records.extend(boundary.records);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.check_connected()?;
        self.boundary = None;
        Ok(())
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for MemoryStore {
    /// Session-level locks die with the session, as they do in PostgreSQL.
    fn drop(&mut self) {
        let mut shared = self.shared();
        if shared.lock_holder == Some(self.session) {
            shared.lock_holder = None;
        }
    }
}
