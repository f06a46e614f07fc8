//! Registry database: one row per mounted queue.

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

use super::{migration, open_connection, SqliteConfig};
use crate::protocol::QueueKind;

#[derive(Debug, Clone, PartialEq)]
pub struct SysQueueRow {
    pub name: String,
    pub kind: QueueKind,
    pub class: String,
    pub comment: String,
}

pub struct SysStore {
    conn: Mutex<Connection>,
}

impl SysStore {
    pub fn open(config: SqliteConfig) -> Result<Self, rusqlite::Error> {
        let conn = open_connection(&config)?;
        migration::migrate_sys(&conn)?;
        info!(path = %config.path.display(), "Registry database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_queue(&self, row: &SysQueueRow, now: u64) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute(
            "INSERT INTO sys_queue (name, kind, qclass, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                kind = excluded.kind,
                qclass = excluded.qclass,
                comment = excluded.comment",
            params![row.name, row.kind.code(), row.class, row.comment, now as i64],
        )?;
        Ok(())
    }

    pub fn delete_queue(&self, name: &str) -> Result<bool, rusqlite::Error> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM sys_queue WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }

    pub fn load_queues(&self) -> Result<Vec<SysQueueRow>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name, kind, qclass, comment FROM sys_queue ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(SysQueueRow {
                name: row.get(0)?,
                kind: QueueKind::from_code(row.get(1)?),
                class: row.get(2)?,
                comment: row.get(3)?,
            })
        })?;
        rows.collect()
    }
}
