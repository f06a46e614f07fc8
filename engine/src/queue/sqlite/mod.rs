//! SQLite storage layer.
//!
//! Every queue owns one database file (`jsq_<name>.db`) holding its job
//! records, the overflow side table, the affinity dictionary and postings,
//! tag postings and the id counter. The registry keeps queue descriptions
//! in a separate `netsched_sys.db`.
//!
//! All functions here return raw `rusqlite::Error` so the caller can decide
//! whether a failure is transient (busy/locked) and worth retrying.

pub mod affinity;
pub mod jobs;
mod migration;
mod sys;
pub mod tags;

#[cfg(test)]
mod tests;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::StorageConfig;

pub use sys::{SysQueueRow, SysStore};

/// SQLite connection configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Enable WAL mode (recommended)
    pub wal_mode: bool,
    /// Synchronous mode: 0=OFF, 1=NORMAL, 2=FULL
    pub synchronous: i32,
    /// Cache size in pages (negative = KB)
    pub cache_size: i32,
}

impl SqliteConfig {
    pub fn from_storage(storage: &StorageConfig, file_name: &str) -> Self {
        Self {
            path: storage.data_dir.join(file_name),
            wal_mode: storage.wal_mode,
            synchronous: storage.synchronous,
            cache_size: storage.cache_size,
        }
    }
}

/// Open a connection and apply pragmas.
pub fn open_connection(config: &SqliteConfig) -> Result<Connection, rusqlite::Error> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let conn = Connection::open(&config.path)?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = {};
         PRAGMA synchronous = {};
         PRAGMA cache_size = {};
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 1000;",
        if config.wal_mode { "WAL" } else { "DELETE" },
        config.synchronous,
        config.cache_size,
    ))?;
    Ok(conn)
}

/// Database file name for a queue.
pub fn queue_file_name(queue: &str) -> String {
    format!("jsq_{}.db", queue)
}

/// Remove a database file and its WAL companions.
pub fn remove_database_files(path: &Path) -> std::io::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut p = path.as_os_str().to_owned();
        p.push(suffix);
        match std::fs::remove_file(PathBuf::from(p)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Persistent store of one queue.
pub struct JobStore {
    /// Database connection (protected by Mutex for thread safety)
    conn: Mutex<Connection>,
    /// Path to the database file
    pub path: PathBuf,
    /// Payloads longer than this go to the overflow table
    overflow_threshold: usize,
}

impl JobStore {
    /// Open (creating if needed) and migrate a queue database.
    pub fn open(config: SqliteConfig, overflow_threshold: usize) -> Result<Self, rusqlite::Error> {
        let conn = open_connection(&config)?;
        migration::migrate(&conn)?;
        info!(path = %config.path.display(), "Queue database opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path: config.path,
            overflow_threshold,
        })
    }

    #[inline]
    pub fn overflow_threshold(&self) -> usize {
        self.overflow_threshold
    }

    /// Run `f` inside a transaction, committing on success.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, rusqlite::Error>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run a read-only closure against the connection.
    pub fn read<T, F>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}
