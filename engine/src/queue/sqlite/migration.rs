//! SQLite schema migrations for queue databases and the registry database.

use rusqlite::Connection;
use tracing::info;

/// Queue database: job records, overflow side table, affinity and tag indexes.
const QUEUE_MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_jobs",
        "CREATE TABLE jobs (
            id INTEGER PRIMARY KEY,
            status INTEGER NOT NULL,
            time_submit INTEGER NOT NULL,
            time_run INTEGER NOT NULL DEFAULT 0,
            time_done INTEGER NOT NULL DEFAULT 0,
            timeout INTEGER NOT NULL DEFAULT 0,
            run_timeout INTEGER NOT NULL DEFAULT 0,
            subm_addr TEXT,
            subm_port INTEGER NOT NULL DEFAULT 0,
            subm_timeout INTEGER NOT NULL DEFAULT 0,
            workers TEXT NOT NULL DEFAULT '[]',
            run_counter INTEGER NOT NULL DEFAULT 0,
            ret_code INTEGER NOT NULL DEFAULT 0,
            aff_id INTEGER NOT NULL DEFAULT 0,
            mask INTEGER NOT NULL DEFAULT 0,
            overflow INTEGER NOT NULL DEFAULT 0,
            input TEXT NOT NULL DEFAULT '',
            output TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '',
            err_msg TEXT NOT NULL DEFAULT '',
            progress_msg TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX idx_jobs_status ON jobs(status);",
    ),
    (
        "002_create_job_overflow",
        "CREATE TABLE job_overflow (
            job_id INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (job_id, kind)
        ) WITHOUT ROWID;",
    ),
    (
        "003_create_affinity",
        "CREATE TABLE affinity_dict (
            aff_id INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT NOT NULL UNIQUE
        );

        CREATE TABLE affinity_jobs (
            aff_id INTEGER NOT NULL,
            job_id INTEGER NOT NULL,
            PRIMARY KEY (aff_id, job_id)
        ) WITHOUT ROWID;

        CREATE INDEX idx_affinity_jobs_job ON affinity_jobs(job_id);",
    ),
    (
        "004_create_job_tags",
        "CREATE TABLE job_tags (
            tag_key TEXT NOT NULL,
            tag_val TEXT NOT NULL,
            job_id INTEGER NOT NULL,
            PRIMARY KEY (tag_key, tag_val, job_id)
        ) WITHOUT ROWID;

        CREATE INDEX idx_job_tags_job ON job_tags(job_id);",
    ),
    (
        "005_create_counters",
        "CREATE TABLE counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        INSERT INTO counters (name, value) VALUES ('job_id', 0);",
    ),
    (
        "006_create_erased_jobs",
        "CREATE TABLE erased_jobs (
            job_id INTEGER PRIMARY KEY
        );",
    ),
];

/// Registry database: queue descriptions for re-mounting at startup.
const SYS_MIGRATIONS: &[(&str, &str)] = &[(
    "001_create_sys_queue",
    "CREATE TABLE sys_queue (
        name TEXT PRIMARY KEY,
        kind INTEGER NOT NULL,
        qclass TEXT NOT NULL,
        comment TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL
    );",
)];

/// Run all queue database migrations.
pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    apply(conn, QUEUE_MIGRATIONS)
}

/// Run all registry database migrations.
pub fn migrate_sys(conn: &Connection) -> Result<(), rusqlite::Error> {
    apply(conn, SYS_MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[(&str, &str)]) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM migrations")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let mut applied_count = 0;
    for (name, sql) in migrations {
        if applied.iter().any(|a| a.as_str() == *name) {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?1, strftime('%s', 'now'))",
            [*name],
        )?;
        tx.commit()?;
        applied_count += 1;
    }

    if applied_count > 0 {
        info!(count = applied_count, "Applied SQLite migrations");
    }

    Ok(())
}
