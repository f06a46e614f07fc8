//! Core `Queue` struct: one named queue with its store and in-memory indexes.
//!
//! The operations are split across sibling files (`submit.rs`,
//! `dispatch.rs`, `result.rs`, `job_ops.rs`, `select.rs`) as further
//! `impl Queue` blocks.
//!
//! Lock order, outermost first: `params`, `affinity`, `workers`, `timeline`,
//! `erased`. The status index and the store connection are leaf locks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};
use rusqlite::Transaction;
use tracing::{debug, info, warn};

use super::notifier::Notifier;
use super::retry::with_retry;
use super::sqlite::{self, affinity as affinity_store, jobs, JobStore, SqliteConfig};
use super::types::{
    now_secs, AffinityIndex, JobSet, QueueMetrics, QueueStats, StatusIndex, Timeline,
    WorkerAffinity,
};
use crate::config::{ProgramVersion, QueueParams, StorageConfig};
use crate::error::{Result, SchedError};
use crate::protocol::{client_version, Client, JobRecord, JobStatus, QueueInfo, QueueKind};

pub struct Queue {
    pub(crate) name: CompactString,
    pub(crate) kind: QueueKind,
    pub(crate) class: String,
    pub(crate) comment: RwLock<String>,
    pub(crate) params: RwLock<QueueParams>,
    pub(crate) version_gate: RwLock<Vec<ProgramVersion>>,
    pub(crate) retry_bound: u32,
    pub(crate) store: JobStore,
    pub(crate) status: StatusIndex,
    pub(crate) affinity: RwLock<AffinityIndex>,
    pub(crate) workers: Mutex<WorkerAffinity>,
    pub(crate) timeline: Mutex<Timeline>,
    pub(crate) notifier: Notifier,
    /// Logically erased jobs awaiting physical deletion
    pub(crate) erased: Mutex<JobSet>,
    pub(crate) metrics: QueueMetrics,
    pub(crate) deleted: AtomicBool,
    /// When the queue was first seen empty, 0 while it holds jobs
    pub(crate) empty_since: AtomicU64,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("class", &self.class)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl Queue {
    /// Open the queue database and rebuild the in-memory indexes from it.
    pub fn mount(
        name: &str,
        kind: QueueKind,
        class: &str,
        comment: &str,
        params: QueueParams,
        storage: &StorageConfig,
        retry_bound: u32,
    ) -> Result<Self> {
        let version_gate = params.version_gate()?;
        let store = JobStore::open(
            SqliteConfig::from_storage(storage, &sqlite::queue_file_name(name)),
            storage.overflow_threshold,
        )?;

        let (statuses, erased_ids, tokens, postings) = store.read(|conn| {
            Ok((
                jobs::load_statuses(conn)?,
                jobs::load_erased(conn)?,
                affinity_store::load_tokens(conn)?,
                affinity_store::load_postings(conn)?,
            ))
        })?;

        let erased: JobSet = erased_ids.into_iter().collect();
        let status = StatusIndex::new();
        for (id, s) in statuses {
            if !erased.contains(id) {
                status.insert(id, s);
            }
        }

        let mut affinity = AffinityIndex::new();
        for (aff_id, token) in &tokens {
            affinity.register_token(*aff_id, token);
        }
        for (aff_id, job_id) in postings {
            if !erased.contains(job_id) {
                affinity.add_job(aff_id, job_id);
            }
        }

        let mut timeline = Timeline::new(params.run_timeout_precision);
        let running = status.snapshot(JobStatus::Running);
        if !running.is_empty() {
            store.read(|conn| {
                for id in running.iter() {
                    if let Some(job) = jobs::load_job(conn, id)? {
                        let run_timeout = job.effective_run_timeout(&params);
                        if run_timeout > 0 {
                            timeline.add(id, job.time_run.saturating_add(run_timeout));
                        }
                    }
                }
                Ok(())
            })?;
        }

        info!(
            queue = %name,
            class = %class,
            jobs = status.total(),
            pending = status.count(JobStatus::Pending),
            running = status.count(JobStatus::Running),
            erased = erased.len(),
            affinities = affinity.token_count(),
            "Queue mounted"
        );

        Ok(Self {
            name: CompactString::from(name),
            kind,
            class: class.to_string(),
            comment: RwLock::new(comment.to_string()),
            params: RwLock::new(params),
            version_gate: RwLock::new(version_gate),
            retry_bound,
            store,
            status,
            affinity: RwLock::new(affinity),
            workers: Mutex::new(WorkerAffinity::new()),
            timeline: Mutex::new(timeline),
            notifier: Notifier::new(name),
            erased: Mutex::new(erased),
            metrics: QueueMetrics::new(),
            deleted: AtomicBool::new(false),
            empty_since: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn params(&self) -> QueueParams {
        self.params.read().clone()
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            name: self.name.to_string(),
            kind: self.kind,
            class: self.class.clone(),
            comment: self.comment.read().clone(),
        }
    }

    pub fn statistics(&self) -> QueueStats {
        self.metrics.snapshot()
    }

    /// Number of jobs currently tracked (erased jobs excluded).
    pub fn job_count(&self) -> usize {
        self.status.total()
    }

    /// Replace the class parameters of a live queue.
    pub fn set_params(&self, params: QueueParams) -> Result<()> {
        params.validate()?;
        let gate = params.version_gate()?;
        self.timeline.lock().set_precision(params.run_timeout_precision);
        *self.version_gate.write() = gate;
        *self.params.write() = params;
        debug!(queue = %self.name, "Queue parameters updated");
        Ok(())
    }

    pub fn set_comment(&self, comment: &str) {
        *self.comment.write() = comment.to_string();
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(SchedError::UnknownQueue(self.name.to_string()));
        }
        Ok(())
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Mark the queue deleted while holding the store connection, so no
    /// transaction can commit afterwards. With `only_if_empty`, a queue
    /// holding a live record is left alone and `false` is returned.
    pub(crate) fn retire(&self, only_if_empty: bool) -> Result<bool> {
        let retired = self.store.read(|conn| {
            if only_if_empty && jobs::has_live_jobs(conn)? {
                return Ok(false);
            }
            self.mark_deleted();
            Ok(true)
        })?;
        Ok(retired)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Run `f` in a storage transaction, retrying on contention. Fails with
    /// `UnknownQueue` once the queue has been retired.
    pub(crate) fn transact<T, F>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> std::result::Result<T, rusqlite::Error>,
    {
        let out = with_retry(self.retry_bound, |_| {
            self.store.transaction(|tx| {
                if self.is_deleted() {
                    return Ok(None);
                }
                f(tx).map(Some)
            })
        })
        .into_result()?;
        out.ok_or_else(|| SchedError::UnknownQueue(self.name.to_string()))
    }

    pub(crate) fn load_job(&self, id: u64) -> Result<Option<JobRecord>> {
        with_retry(self.retry_bound, |_| {
            self.store.read(|conn| jobs::load_job(conn, id))
        })
        .into_result()
    }

    pub(crate) fn check_submitter(&self, client: &Client) -> Result<()> {
        if !self.params.read().submitter_allowed(&client.host) {
            return Err(SchedError::AccessDenied(format!(
                "submitter host {} is not allowed on queue {}",
                client.host, self.name
            )));
        }
        self.check_version(client)
    }

    pub(crate) fn check_worker(&self, client: &Client) -> Result<()> {
        if !self.params.read().worker_allowed(&client.host) {
            return Err(SchedError::AccessDenied(format!(
                "worker host {} is not allowed on queue {}",
                client.host, self.name
            )));
        }
        self.check_version(client)
    }

    fn check_version(&self, client: &Client) -> Result<()> {
        let gate = self.version_gate.read();
        if gate.is_empty() {
            return Ok(());
        }
        let admitted = client_version(client)
            .map_or(false, |v| gate.iter().any(|entry| entry.admits(&v)));
        if admitted {
            Ok(())
        } else {
            Err(SchedError::AccessViolation(format!(
                "client program {:?} does not satisfy queue {} version gate",
                client.program.as_deref().unwrap_or(""),
                self.name
            )))
        }
    }

    /// Drop jobs that no longer exist in the store from every index.
    pub(crate) fn forget_jobs(&self, ids: &JobSet) {
        if ids.is_empty() {
            return;
        }
        self.status.remove_all(ids);
        self.affinity.write().remove_jobs(ids);
        self.workers.lock().forget_jobs(ids);
        let mut timeline = self.timeline.lock();
        for id in ids.iter() {
            timeline.remove(id);
        }
    }

    /// A tracked id whose record is gone: log it and stop tracking it.
    pub(crate) fn job_vanished(&self, id: u64) {
        warn!(queue = %self.name, job_id = id, "Job tracked in status index has no record");
        self.forget_jobs(&[id].into_iter().collect());
    }

    /// Register (timeout > 0), refresh or unregister (timeout 0) a worker
    /// listening for "work available" datagrams.
    pub fn register_listener(&self, client: &Client, port: u16, timeout: u64) -> Result<()> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        self.notifier.register(&client.host, port, timeout, now_secs());
        debug!(queue = %self.name, host = %client.host, port, timeout, "Listener registered");
        Ok(())
    }

    pub fn unregister_listener(&self, client: &Client, port: u16) -> bool {
        self.notifier.unregister(&client.host, port)
    }

    /// Notify listeners that work is pending. Returns datagrams sent.
    pub fn notify_listeners(&self, force: bool) -> usize {
        self.notify_listeners_at(now_secs(), force)
    }

    pub(crate) fn notify_listeners_at(&self, now: u64, force: bool) -> usize {
        self.notifier.prune(now);
        if self.status.count(JobStatus::Pending) == 0 {
            return 0;
        }
        let throttle = self.params.read().notif_timeout;
        self.notifier.notify_listeners(throttle, now, force, || {
            self.status.count(JobStatus::Pending) > 0
        })
    }

    /// Push "job done" to a submitter still waiting for it.
    pub(crate) fn notify_submitter(&self, job: &JobRecord, now: u64) {
        if !job.submitter_waiting(now) {
            return;
        }
        if let Some(addr) = job.subm_addr.as_deref() {
            if self.notifier.notify_submitter(addr, job.subm_port, job.id) {
                debug!(queue = %self.name, job_id = job.id, addr = %addr, "Submitter notified");
            }
        }
    }
}
