//! Affinity dictionary and token postings.

use rusqlite::{params, Connection, OptionalExtension};

/// Look up a token, creating it on first use. Returns (id, created).
pub fn resolve_token(conn: &Connection, token: &str) -> Result<(u64, bool), rusqlite::Error> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT aff_id FROM affinity_dict WHERE token = ?1",
            params![token],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id as u64, false));
    }
    conn.execute(
        "INSERT INTO affinity_dict (token) VALUES (?1)",
        params![token],
    )?;
    Ok((conn.last_insert_rowid() as u64, true))
}

pub fn add_postings(
    conn: &Connection,
    aff_id: u64,
    first: u64,
    last: u64,
) -> Result<(), rusqlite::Error> {
    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO affinity_jobs (aff_id, job_id) VALUES (?1, ?2)")?;
    for job_id in first..=last {
        stmt.execute(params![aff_id as i64, job_id as i64])?;
    }
    Ok(())
}

/// All tokens as (id, token).
pub fn load_tokens(conn: &Connection) -> Result<Vec<(u64, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT aff_id, token FROM affinity_dict")?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        Ok((id as u64, row.get(1)?))
    })?;
    rows.collect()
}

/// All postings as (aff_id, job_id).
pub fn load_postings(conn: &Connection) -> Result<Vec<(u64, u64)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT aff_id, job_id FROM affinity_jobs")?;
    let rows = stmt.query_map([], |row| {
        let aff: i64 = row.get(0)?;
        let job: i64 = row.get(1)?;
        Ok((aff as u64, job as u64))
    })?;
    rows.collect()
}

/// Remove postings that reference deleted jobs.
pub fn remove_dangling_postings(conn: &Connection) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM affinity_jobs WHERE job_id NOT IN (SELECT id FROM jobs)",
        [],
    )
}

/// Delete tokens that no posting references any more. Returns the ids
/// actually deleted.
pub fn delete_unused_tokens(conn: &Connection, ids: &[u64]) -> Result<Vec<u64>, rusqlite::Error> {
    let mut stmt = conn.prepare_cached(
        "DELETE FROM affinity_dict WHERE aff_id = ?1
         AND NOT EXISTS (SELECT 1 FROM affinity_jobs WHERE aff_id = ?1)",
    )?;
    let mut deleted = Vec::new();
    for id in ids {
        if stmt.execute(params![*id as i64])? > 0 {
            deleted.push(*id);
        }
    }
    Ok(deleted)
}
