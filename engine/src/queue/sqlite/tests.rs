//! SQLite persistence tests.

use super::*;
use crate::protocol::{JobRecord, JobStatus, QueueKind, SubmitRequest};
use tempfile::{NamedTempFile, TempDir};

const THRESHOLD: usize = 32;

/// Helper to create a test job store with temp file.
fn create_test_store() -> (JobStore, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let config = SqliteConfig {
        path: temp_file.path().to_path_buf(),
        wal_mode: true,
        synchronous: 0, // OFF for test speed
        cache_size: -2000,
    };
    let store = JobStore::open(config, THRESHOLD).expect("Failed to open store");
    (store, temp_file)
}

fn create_test_job(id: u64, input: &str) -> JobRecord {
    JobRecord::new(id, &SubmitRequest::new(input), 0, 1000)
}

#[test]
fn test_insert_and_load() {
    let (store, _tmp) = create_test_store();
    let mut job = create_test_job(1, "payload");
    job.tags = vec![("owner".to_string(), "alice".to_string())];
    job.subm_addr = Some("10.0.0.1".to_string());
    job.subm_port = 9100;

    store.transaction(|tx| jobs::insert_job(tx, &job, THRESHOLD)).unwrap();
    let loaded = store.read(|conn| jobs::load_job(conn, 1)).unwrap().unwrap();

    assert_eq!(loaded, job);
    assert!(store.read(|conn| jobs::load_job(conn, 2)).unwrap().is_none());
}

#[test]
fn test_overflow_payloads() {
    let (store, _tmp) = create_test_store();
    let mut job = create_test_job(1, &"i".repeat(100));
    job.tags = vec![("note".to_string(), "t".repeat(50))];

    store.transaction(|tx| jobs::insert_job(tx, &job, THRESHOLD)).unwrap();

    let (inline, bits, rows): (String, i64, i64) = store
        .read(|conn| {
            let (inline, bits) = conn.query_row(
                "SELECT input, overflow FROM jobs WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let rows = conn.query_row("SELECT COUNT(*) FROM job_overflow", [], |row| row.get(0))?;
            Ok((inline, bits, rows))
        })
        .unwrap();
    assert_eq!(inline, "");
    assert_eq!(bits, 1 | 4);
    assert_eq!(rows, 2);

    let loaded = store.read(|conn| jobs::load_job(conn, 1)).unwrap().unwrap();
    assert_eq!(loaded.input, job.input);
    assert_eq!(loaded.tags, job.tags);
}

#[test]
fn test_output_overflow_flips_back() {
    let (store, _tmp) = create_test_store();
    let mut job = create_test_job(1, "in");
    store.transaction(|tx| jobs::insert_job(tx, &job, THRESHOLD)).unwrap();

    job.output = "o".repeat(64);
    job.status = JobStatus::Done;
    assert!(store.transaction(|tx| jobs::update_job(tx, &job, THRESHOLD)).unwrap());
    let loaded = store.read(|conn| jobs::load_job(conn, 1)).unwrap().unwrap();
    assert_eq!(loaded.output, job.output);
    assert_eq!(loaded.status, JobStatus::Done);

    job.output = "short".to_string();
    store.transaction(|tx| jobs::update_job(tx, &job, THRESHOLD)).unwrap();
    let (loaded, rows): (JobRecord, i64) = store
        .read(|conn| {
            let rows = conn.query_row("SELECT COUNT(*) FROM job_overflow", [], |row| row.get(0))?;
            Ok((jobs::load_job(conn, 1)?.unwrap(), rows))
        })
        .unwrap();
    assert_eq!(loaded.output, "short");
    assert_eq!(rows, 0);
}

#[test]
fn test_update_missing_job() {
    let (store, _tmp) = create_test_store();
    let job = create_test_job(5, "x");
    assert!(!store.transaction(|tx| jobs::update_job(tx, &job, THRESHOLD)).unwrap());
}

#[test]
fn test_delete_job_removes_side_rows() {
    let (store, _tmp) = create_test_store();
    let mut job = create_test_job(1, &"x".repeat(100));
    job.tags = vec![("k".to_string(), "v".to_string())];
    store
        .transaction(|tx| {
            jobs::insert_job(tx, &job, THRESHOLD)?;
            let (aff, _) = affinity::resolve_token(tx, "grp")?;
            affinity::add_postings(tx, aff, 1, 1)
        })
        .unwrap();

    assert!(store.transaction(|tx| jobs::delete_job(tx, 1)).unwrap());
    let counts: Vec<i64> = store
        .read(|conn| {
            ["job_overflow", "job_tags", "affinity_jobs"]
                .iter()
                .map(|t| conn.query_row(&format!("SELECT COUNT(*) FROM {}", t), [], |r| r.get(0)))
                .collect()
        })
        .unwrap();
    assert_eq!(counts, vec![0, 0, 0]);
    assert!(!store.transaction(|tx| jobs::delete_job(tx, 1)).unwrap());
}

#[test]
fn test_id_counter() {
    let (store, _tmp) = create_test_store();
    assert_eq!(store.read(|conn| jobs::last_id(conn)).unwrap(), 0);
    assert_eq!(store.transaction(|tx| jobs::next_id_batch(tx, 1)).unwrap(), 1);
    assert_eq!(store.transaction(|tx| jobs::next_id_batch(tx, 10)).unwrap(), 2);
    assert_eq!(store.transaction(|tx| jobs::next_id_batch(tx, 1)).unwrap(), 12);
    assert_eq!(store.read(|conn| jobs::last_id(conn)).unwrap(), 12);
}

#[test]
fn test_load_statuses() {
    let (store, _tmp) = create_test_store();
    store
        .transaction(|tx| {
            for id in 1..=3 {
                let mut job = create_test_job(id, "x");
                if id == 2 {
                    job.status = JobStatus::Failed;
                }
                jobs::insert_job(tx, &job, THRESHOLD)?;
            }
            Ok(())
        })
        .unwrap();

    let statuses = store.read(|conn| jobs::load_statuses(conn)).unwrap();
    assert_eq!(
        statuses,
        vec![
            (1, JobStatus::Pending),
            (2, JobStatus::Failed),
            (3, JobStatus::Pending)
        ]
    );
}

#[test]
fn test_tag_postings() {
    let (store, _tmp) = create_test_store();
    store
        .transaction(|tx| {
            for (id, value) in [(1, "a"), (2, "b"), (3, "a")] {
                let mut job = create_test_job(id, "x");
                job.tags = vec![("grp".to_string(), value.to_string())];
                jobs::insert_job(tx, &job, THRESHOLD)?;
            }
            Ok(())
        })
        .unwrap();

    let a: Vec<u64> = store
        .read(|conn| tags::tag_jobs(conn, "grp", Some("a")))
        .unwrap()
        .iter()
        .collect();
    let any = store.read(|conn| tags::tag_jobs(conn, "grp", None)).unwrap();
    let none = store.read(|conn| tags::tag_jobs(conn, "other", None)).unwrap();

    assert_eq!(a, vec![1, 3]);
    assert_eq!(any.len(), 3);
    assert!(none.is_empty());
}

#[test]
fn test_affinity_tokens() {
    let (store, _tmp) = create_test_store();
    let (first, created) = store
        .transaction(|tx| affinity::resolve_token(tx, "grp"))
        .unwrap();
    assert!(created);
    let (again, created) = store
        .transaction(|tx| affinity::resolve_token(tx, "grp"))
        .unwrap();
    assert!(!created);
    assert_eq!(first, again);

    store
        .transaction(|tx| affinity::add_postings(tx, first, 1, 3))
        .unwrap();
    let tokens = store.read(|conn| affinity::load_tokens(conn)).unwrap();
    let postings = store.read(|conn| affinity::load_postings(conn)).unwrap();
    assert_eq!(tokens, vec![(first, "grp".to_string())]);
    assert_eq!(postings.len(), 3);
}

#[test]
fn test_unused_tokens_deleted() {
    let (store, _tmp) = create_test_store();
    let (used, unused) = store
        .transaction(|tx| {
            jobs::insert_job(tx, &create_test_job(1, "x"), THRESHOLD)?;
            let (used, _) = affinity::resolve_token(tx, "used")?;
            let (unused, _) = affinity::resolve_token(tx, "unused")?;
            affinity::add_postings(tx, used, 1, 1)?;
            // Posting of a job that was never stored.
            affinity::add_postings(tx, unused, 99, 99)?;
            Ok((used, unused))
        })
        .unwrap();

    let (dangling, deleted) = store
        .transaction(|tx| {
            let dangling = affinity::remove_dangling_postings(tx)?;
            Ok((dangling, affinity::delete_unused_tokens(tx, &[used, unused])?))
        })
        .unwrap();
    assert_eq!(dangling, 1);
    assert_eq!(deleted, vec![unused]);

    // A token re-created after deletion gets a fresh id.
    let (recreated, created) = store
        .transaction(|tx| affinity::resolve_token(tx, "unused"))
        .unwrap();
    assert!(created);
    assert!(recreated > unused);
}

#[test]
fn test_erased_jobs() {
    let (store, _tmp) = create_test_store();
    store
        .transaction(|tx| {
            jobs::insert_job(tx, &create_test_job(1, "x"), THRESHOLD)?;
            jobs::insert_job(tx, &create_test_job(2, "y"), THRESHOLD)?;
            jobs::mark_erased(tx, 2)?;
            jobs::mark_erased(tx, 2)
        })
        .unwrap();
    assert_eq!(store.read(|conn| jobs::load_erased(conn)).unwrap(), vec![2]);

    store.transaction(|tx| jobs::purge_erased(tx, 2)).unwrap();
    assert!(store.read(|conn| jobs::load_erased(conn)).unwrap().is_empty());
    assert!(store.read(|conn| jobs::load_job(conn, 2)).unwrap().is_none());
    assert!(store.read(|conn| jobs::load_job(conn, 1)).unwrap().is_some());
}

#[test]
fn test_reopen_keeps_data() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = SqliteConfig {
        path: temp_file.path().to_path_buf(),
        wal_mode: true,
        synchronous: 0,
        cache_size: -2000,
    };
    {
        let store = JobStore::open(config.clone(), THRESHOLD).unwrap();
        store
            .transaction(|tx| {
                jobs::next_id_batch(tx, 1)?;
                jobs::insert_job(tx, &create_test_job(1, "persisted"), THRESHOLD)
            })
            .unwrap();
    }

    // Migrations are idempotent on an existing database.
    let store = JobStore::open(config, THRESHOLD).unwrap();
    let job = store.read(|conn| jobs::load_job(conn, 1)).unwrap().unwrap();
    assert_eq!(job.input, "persisted");
    assert_eq!(store.read(|conn| jobs::last_id(conn)).unwrap(), 1);
}

#[test]
fn test_sys_store() {
    let dir = TempDir::new().unwrap();
    let config = SqliteConfig {
        path: dir.path().join("sys.db"),
        wal_mode: false,
        synchronous: 0,
        cache_size: -2000,
    };
    let sys = SysStore::open(config).unwrap();
    let row = SysQueueRow {
        name: "q1".to_string(),
        kind: QueueKind::Dynamic,
        class: "default".to_string(),
        comment: "first".to_string(),
    };
    sys.upsert_queue(&row, 100).unwrap();
    sys.upsert_queue(
        &SysQueueRow {
            comment: "updated".to_string(),
            ..row.clone()
        },
        200,
    )
    .unwrap();

    let rows = sys.load_queues().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].comment, "updated");
    assert_eq!(rows[0].kind, QueueKind::Dynamic);

    assert!(sys.delete_queue("q1").unwrap());
    assert!(!sys.delete_queue("q1").unwrap());
    assert!(sys.load_queues().unwrap().is_empty());
}

#[test]
fn test_remove_database_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(queue_file_name("gone"));
    {
        let config = SqliteConfig {
            path: path.clone(),
            wal_mode: true,
            synchronous: 0,
            cache_size: -2000,
        };
        JobStore::open(config, THRESHOLD).unwrap();
    }
    assert!(path.exists());

    remove_database_files(&path).unwrap();
    assert!(!path.exists());
    // Removing again is not an error.
    remove_database_files(&path).unwrap();
}
