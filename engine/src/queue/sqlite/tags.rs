//! Tag postings: (key, value) -> job ids.

use rusqlite::{params, Connection};

use crate::queue::types::JobSet;

/// Jobs carrying tag `key`, with `value` or with any value when `None`.
pub fn tag_jobs(
    conn: &Connection,
    key: &str,
    value: Option<&str>,
) -> Result<JobSet, rusqlite::Error> {
    let mut out = JobSet::new();
    match value {
        Some(value) => {
            let mut stmt = conn.prepare_cached(
                "SELECT job_id FROM job_tags WHERE tag_key = ?1 AND tag_val = ?2",
            )?;
            let rows = stmt.query_map(params![key, value], |row| row.get::<_, i64>(0))?;
            for id in rows {
                out.insert(id? as u64);
            }
        }
        None => {
            let mut stmt =
                conn.prepare_cached("SELECT job_id FROM job_tags WHERE tag_key = ?1")?;
            let rows = stmt.query_map(params![key], |row| row.get::<_, i64>(0))?;
            for id in rows {
                out.insert(id? as u64);
            }
        }
    }
    Ok(out)
}
