//! SQLite job record operations.
//!
//! Input, output and the serialized tag list are stored inline unless they
//! exceed the overflow threshold, in which case the inline column is left
//! empty, a bit is set in `overflow` and the value lives in `job_overflow`.

use rusqlite::{params, Connection, OptionalExtension};

use crate::protocol::{JobRecord, JobStatus};

const OVERFLOW_INPUT: i64 = 1;
const OVERFLOW_OUTPUT: i64 = 2;
const OVERFLOW_TAGS: i64 = 4;

const JOB_COLUMNS: &str = "id, status, time_submit, time_run, time_done, timeout, run_timeout,
    subm_addr, subm_port, subm_timeout, workers, run_counter, ret_code, aff_id, mask,
    overflow, input, output, tags, err_msg, progress_msg";

fn to_sql_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

/// Inline column value for `data`, writing or clearing its overflow row.
fn place_payload(
    conn: &Connection,
    job_id: u64,
    kind: i64,
    data: &str,
    threshold: usize,
) -> Result<(String, bool), rusqlite::Error> {
    if data.len() > threshold {
        conn.execute(
            "INSERT OR REPLACE INTO job_overflow (job_id, kind, data) VALUES (?1, ?2, ?3)",
            params![job_id as i64, kind, data],
        )?;
        Ok((String::new(), true))
    } else {
        conn.execute(
            "DELETE FROM job_overflow WHERE job_id = ?1 AND kind = ?2",
            params![job_id as i64, kind],
        )?;
        Ok((data.to_string(), false))
    }
}

fn read_overflow(conn: &Connection, job_id: u64, kind: i64) -> Result<String, rusqlite::Error> {
    conn.query_row(
        "SELECT data FROM job_overflow WHERE job_id = ?1 AND kind = ?2",
        params![job_id as i64, kind],
        |row| row.get(0),
    )
}

/// Insert a new job record with its tag postings.
pub fn insert_job(
    conn: &Connection,
    job: &JobRecord,
    threshold: usize,
) -> Result<(), rusqlite::Error> {
    let tags_json = if job.tags.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&job.tags).map_err(to_sql_err)?
    };
    let workers = serde_json::to_string(&job.workers).map_err(to_sql_err)?;

    let (input, input_of) = place_payload(conn, job.id, OVERFLOW_INPUT, &job.input, threshold)?;
    let (output, output_of) =
        place_payload(conn, job.id, OVERFLOW_OUTPUT, &job.output, threshold)?;
    let (tags, tags_of) = place_payload(conn, job.id, OVERFLOW_TAGS, &tags_json, threshold)?;
    let overflow = overflow_bits(input_of, output_of, tags_of);

    conn.execute(
        &format!(
            "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            JOB_COLUMNS
        ),
        params![
            job.id as i64,
            job.status.code(),
            job.time_submit as i64,
            job.time_run as i64,
            job.time_done as i64,
            job.timeout as i64,
            job.run_timeout as i64,
            job.subm_addr,
            job.subm_port,
            job.subm_timeout as i64,
            workers,
            job.run_counter,
            job.ret_code,
            job.aff_id as i64,
            job.mask as i64,
            overflow,
            input,
            output,
            tags,
            job.err_msg,
            job.progress_msg,
        ],
    )?;

    if !job.tags.is_empty() {
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO job_tags (tag_key, tag_val, job_id) VALUES (?1, ?2, ?3)",
        )?;
        for (key, value) in &job.tags {
            stmt.execute(params![key, value, job.id as i64])?;
        }
    }
    Ok(())
}

#[inline]
fn overflow_bits(input: bool, output: bool, tags: bool) -> i64 {
    (if input { OVERFLOW_INPUT } else { 0 })
        | (if output { OVERFLOW_OUTPUT } else { 0 })
        | (if tags { OVERFLOW_TAGS } else { 0 })
}

/// Rewrite the mutable part of a record. Input and tags are immutable after
/// submission; the output overflow decision is re-derived on every write.
pub fn update_job(
    conn: &Connection,
    job: &JobRecord,
    threshold: usize,
) -> Result<bool, rusqlite::Error> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT overflow FROM jobs WHERE id = ?1",
            params![job.id as i64],
            |row| row.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Ok(false);
    };

    let (output, output_of) =
        place_payload(conn, job.id, OVERFLOW_OUTPUT, &job.output, threshold)?;
    let overflow = (current & !OVERFLOW_OUTPUT) | if output_of { OVERFLOW_OUTPUT } else { 0 };
    let workers = serde_json::to_string(&job.workers).map_err(to_sql_err)?;

    let updated = conn.execute(
        "UPDATE jobs SET status = ?2, time_run = ?3, time_done = ?4, run_timeout = ?5,
            workers = ?6, run_counter = ?7, ret_code = ?8, overflow = ?9, output = ?10,
            err_msg = ?11, progress_msg = ?12
         WHERE id = ?1",
        params![
            job.id as i64,
            job.status.code(),
            job.time_run as i64,
            job.time_done as i64,
            job.run_timeout as i64,
            workers,
            job.run_counter,
            job.ret_code,
            overflow,
            output,
            job.err_msg,
            job.progress_msg,
        ],
    )?;
    Ok(updated > 0)
}

/// Load a record, resolving overflowed payloads.
pub fn load_job(conn: &Connection, id: u64) -> Result<Option<JobRecord>, rusqlite::Error> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id as i64],
            row_to_job,
        )
        .optional()?;

    let Some((mut job, overflow, tags_inline)) = row else {
        return Ok(None);
    };

    if overflow & OVERFLOW_INPUT != 0 {
        job.input = read_overflow(conn, id, OVERFLOW_INPUT)?;
    }
    if overflow & OVERFLOW_OUTPUT != 0 {
        job.output = read_overflow(conn, id, OVERFLOW_OUTPUT)?;
    }
    let tags_json = if overflow & OVERFLOW_TAGS != 0 {
        read_overflow(conn, id, OVERFLOW_TAGS)?
    } else {
        tags_inline
    };
    if !tags_json.is_empty() {
        job.tags = serde_json::from_str(&tags_json).unwrap_or_default();
    }
    Ok(Some(job))
}

/// Delete a record with its overflow rows and index postings.
pub fn delete_job(conn: &Connection, id: u64) -> Result<bool, rusqlite::Error> {
    let id = id as i64;
    let deleted = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
    conn.execute("DELETE FROM job_overflow WHERE job_id = ?1", params![id])?;
    conn.execute("DELETE FROM job_tags WHERE job_id = ?1", params![id])?;
    conn.execute("DELETE FROM affinity_jobs WHERE job_id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// (id, status) of every persisted job, for rebuilding the status index.
pub fn load_statuses(conn: &Connection) -> Result<Vec<(u64, JobStatus)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT id, status FROM jobs ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let code: i64 = row.get(1)?;
        Ok((id as u64, code))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, code) = row?;
        match JobStatus::from_code(code) {
            Some(status) => out.push((id, status)),
            None => tracing::warn!(job_id = id, code, "Skipping job with unknown status code"),
        }
    }
    Ok(out)
}

/// Reserve `count` consecutive ids. Returns the first one.
pub fn next_id_batch(conn: &Connection, count: u64) -> Result<u64, rusqlite::Error> {
    conn.execute(
        "UPDATE counters SET value = value + ?1 WHERE name = 'job_id'",
        params![count as i64],
    )?;
    Ok(last_id(conn)? - count + 1)
}

/// True if any record exists that is not logically erased.
pub fn has_live_jobs(conn: &Connection) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM jobs WHERE id NOT IN (SELECT job_id FROM erased_jobs))",
        [],
        |row| row.get(0),
    )
}

/// Highest id handed out so far.
pub fn last_id(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let last: i64 = conn.query_row(
        "SELECT value FROM counters WHERE name = 'job_id'",
        [],
        |row| row.get(0),
    )?;
    Ok(last as u64)
}

fn row_to_job(row: &rusqlite::Row) -> Result<(JobRecord, i64, String), rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let code: i64 = row.get(1)?;
    let status = JobStatus::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown job status {}", code).into(),
        )
    })?;
    let workers_str: String = row.get(10)?;
    let workers: Vec<String> = serde_json::from_str(&workers_str).unwrap_or_default();
    let overflow: i64 = row.get(15)?;
    let tags: String = row.get(18)?;

    let job = JobRecord {
        id: id as u64,
        status,
        time_submit: row.get::<_, i64>(2)? as u64,
        time_run: row.get::<_, i64>(3)? as u64,
        time_done: row.get::<_, i64>(4)? as u64,
        timeout: row.get::<_, i64>(5)? as u64,
        run_timeout: row.get::<_, i64>(6)? as u64,
        subm_addr: row.get(7)?,
        subm_port: row.get(8)?,
        subm_timeout: row.get::<_, i64>(9)? as u64,
        workers,
        run_counter: row.get(11)?,
        ret_code: row.get(12)?,
        aff_id: row.get::<_, i64>(13)? as u64,
        mask: row.get::<_, i64>(14)? as u64,
        input: row.get(16)?,
        output: row.get(17)?,
        tags: Vec::new(),
        err_msg: row.get(19)?,
        progress_msg: row.get(20)?,
    };
    Ok((job, overflow, tags))
}

/// Record a logical erase; the reaper deletes the record later.
pub fn mark_erased(conn: &Connection, id: u64) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO erased_jobs (job_id) VALUES (?1)",
        params![id as i64],
    )?;
    Ok(())
}

pub fn load_erased(conn: &Connection) -> Result<Vec<u64>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT job_id FROM erased_jobs ORDER BY job_id")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    rows.map(|r| r.map(|id| id as u64)).collect()
}

/// Physically delete a logically erased record.
pub fn purge_erased(conn: &Connection, id: u64) -> Result<(), rusqlite::Error> {
    delete_job(conn, id)?;
    conn.execute(
        "DELETE FROM erased_jobs WHERE job_id = ?1",
        params![id as i64],
    )?;
    Ok(())
}
