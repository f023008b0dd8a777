use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use sitesync_protocol::types::{
    DIFF_CLASS_NEW, DIFF_CLASS_UNCHANGED, DIFF_CLASS_UPDATED,
};
use sitesync_protocol::SitesyncError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

mod assets;
mod exceptions;
mod queue;
mod runs;
mod schema;

pub use queue::BackoffPolicy;

/// Retry budget for write transactions that hit lock contention.
const BUSY_RETRY_ATTEMPTS: u32 = 8;
const BUSY_RETRY_BASE_MS: u64 = 10;
const BUSY_RETRY_CAP_MS: u64 = 2_000;
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Embedded SQLite store. All SQL in the workspace lives in this module; the
/// connection serializes writes and every transition runs under
/// `BEGIN IMMEDIATE` so readers never observe partial lease reassignment.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
    pub source_name: String,
    pub status: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub config_snapshot: String,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub run_id: i64,
    pub url: String,
    pub depth: u32,
    pub source_name: String,
    pub plugin_hint: Option<String>,
    pub status: String,
    pub attempt_count: u32,
    pub next_run_at: i64,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub finished: i64,
    pub error: i64,
}

impl TaskCounts {
    pub fn drained(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }

    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.finished + self.error
    }
}

#[derive(Debug, Clone)]
pub struct AssetVersionRow {
    pub id: i64,
    pub asset_id: i64,
    pub run_id: i64,
    pub normalized_hash: String,
    pub raw_hash: String,
    pub payload_ref: Option<String>,
    pub diff_class: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ExceptionRow {
    pub id: i64,
    pub run_id: i64,
    pub task_id: Option<i64>,
    pub url: Option<String>,
    pub kind: String,
    pub message: String,
    pub context_json: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

/// Input for a single normalized payload observation.
#[derive(Debug, Clone)]
pub struct NewAssetVersion<'a> {
    pub run_id: i64,
    pub source_name: &'a str,
    pub url: &'a str,
    pub asset_type: &'a str,
    pub normalized_hash: &'a str,
    pub raw_hash: &'a str,
    pub payload_ref: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffClass {
    New,
    Updated,
    Unchanged,
}

impl DiffClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => DIFF_CLASS_NEW,
            Self::Updated => DIFF_CLASS_UPDATED,
            Self::Unchanged => DIFF_CLASS_UNCHANGED,
        }
    }
}

/// Result of a lease-guarded mutation. `Lost` means the caller no longer
/// holds the lease and must not treat the task as its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Applied,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued(i64),
    Duplicate,
}

/// Result of `fail_transient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Requeued { next_run_at: i64 },
    Exhausted,
    Lost,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SitesyncError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| SitesyncError::Storage(err.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self, SitesyncError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, SitesyncError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(db_err)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(db_err)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SitesyncError>,
    ) -> Result<T, SitesyncError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SitesyncError::Storage("mutex poisoned".into()))?;
        f(&conn)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction, retrying bounded
    /// lock contention before giving up.
    pub(crate) fn write_tx<T>(
        &self,
        mut f: impl FnMut(&rusqlite::Transaction<'_>) -> Result<T, SitesyncError>,
    ) -> Result<T, SitesyncError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SitesyncError::Storage("mutex poisoned".into()))?;
        let mut attempt = 0u32;
        loop {
            let result = (|| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(db_err)?;
                let value = f(&tx)?;
                tx.commit().map_err(db_err)?;
                Ok(value)
            })();
            match result {
                Err(SitesyncError::Storage(ref message))
                    if attempt < BUSY_RETRY_ATTEMPTS && message.contains("database is locked") =>
                {
                    attempt += 1;
                    let delay = (BUSY_RETRY_BASE_MS << attempt.min(8)).min(BUSY_RETRY_CAP_MS);
                    tracing::debug!(attempt, delay_ms = delay, "store busy; retrying write");
                    thread::sleep(Duration::from_millis(delay));
                }
                other => return other,
            }
        }
    }
}

pub(crate) fn db_err(err: rusqlite::Error) -> SitesyncError {
    SitesyncError::Storage(err.to_string())
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
    )
}

pub(crate) fn map_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        url: row.get(2)?,
        depth: row.get::<_, i64>(3)? as u32,
        source_name: row.get(4)?,
        plugin_hint: row.get(5)?,
        status: row.get(6)?,
        attempt_count: row.get::<_, i64>(7)? as u32,
        next_run_at: row.get(8)?,
        lease_owner: row.get(9)?,
        lease_expires_at: row.get(10)?,
        last_error: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub(crate) const TASK_COLUMNS: &str = "id, run_id, url, depth, source_name, plugin_hint, status, \
     attempt_count, next_run_at, lease_owner, lease_expires_at, last_error, updated_at";

pub(crate) fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        source_name: row.get(1)?,
        status: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        config_snapshot: row.get(5)?,
    })
}

pub(crate) const RUN_COLUMNS: &str =
    "id, source_name, status, started_at, completed_at, config_snapshot_json";
