//! Core data model: job records, statuses, clients and request types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ProgramVersion, QueueParams};
use crate::error::{Result, SchedError};

/// Number of most recent worker identities kept on a record.
pub const MAX_WORKER_NODES: usize = 5;

/// Persisted job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Canceled,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Done => 2,
            JobStatus::Failed => 3,
            JobStatus::Canceled => 4,
        }
    }

    /// Storage code.
    #[inline]
    pub fn code(self) -> i64 {
        self.index() as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        JobStatus::ALL.get(usize::try_from(code).ok()?).copied()
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Done => "Done",
            JobStatus::Failed => "Failed",
            JobStatus::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as clients observe it.
///
/// `Returned` is never stored: it labels a Pending job that was just
/// relinquished by a worker (failure with retries left, voluntary return,
/// run-timeout) and disappears once the job leaves Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObservedStatus {
    Pending,
    Returned,
    Running,
    Done,
    Failed,
    Canceled,
}

impl ObservedStatus {
    pub fn new(status: JobStatus, returned: bool) -> Self {
        match status {
            JobStatus::Pending if returned => ObservedStatus::Returned,
            JobStatus::Pending => ObservedStatus::Pending,
            JobStatus::Running => ObservedStatus::Running,
            JobStatus::Done => ObservedStatus::Done,
            JobStatus::Failed => ObservedStatus::Failed,
            JobStatus::Canceled => ObservedStatus::Canceled,
        }
    }

    /// The status actually stored for this label.
    pub fn persisted(self) -> JobStatus {
        match self {
            ObservedStatus::Pending | ObservedStatus::Returned => JobStatus::Pending,
            ObservedStatus::Running => JobStatus::Running,
            ObservedStatus::Done => JobStatus::Done,
            ObservedStatus::Failed => JobStatus::Failed,
            ObservedStatus::Canceled => JobStatus::Canceled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObservedStatus::Returned => "Returned",
            other => other.persisted().as_str(),
        }
    }
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservedStatus {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s.to_ascii_lowercase().as_str() {
            "pending" => ObservedStatus::Pending,
            "returned" => ObservedStatus::Returned,
            "running" => ObservedStatus::Running,
            "done" => ObservedStatus::Done,
            "failed" => ObservedStatus::Failed,
            "canceled" | "cancelled" => ObservedStatus::Canceled,
            _ => {
                return Err(SchedError::InvalidArgument(format!(
                    "unknown job status: {}",
                    s
                )))
            }
        };
        Ok(status)
    }
}

/// One persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub status: JobStatus,
    pub time_submit: u64,
    pub time_run: u64,
    pub time_done: u64,
    /// Record lifetime override, 0 = queue default
    pub timeout: u64,
    /// Run deadline set by a heartbeat, cleared at dispatch; 0 = queue default
    pub run_timeout: u64,
    pub subm_addr: Option<String>,
    pub subm_port: u16,
    pub subm_timeout: u64,
    /// Most recent worker identities, oldest first
    pub workers: Vec<String>,
    pub run_counter: u32,
    pub ret_code: i32,
    /// Affinity token id, 0 = none
    pub aff_id: u64,
    pub mask: u64,
    pub input: String,
    pub output: String,
    pub tags: Vec<(String, String)>,
    pub err_msg: String,
    pub progress_msg: String,
}

impl JobRecord {
    pub fn new(id: u64, req: &SubmitRequest, aff_id: u64, now: u64) -> Self {
        let (subm_addr, subm_port, subm_timeout) = match &req.notify {
            Some(n) => (Some(n.addr.clone()), n.port, n.timeout),
            None => (None, 0, 0),
        };
        Self {
            id,
            status: JobStatus::Pending,
            time_submit: now,
            time_run: 0,
            time_done: 0,
            timeout: req.timeout,
            run_timeout: 0,
            subm_addr,
            subm_port,
            subm_timeout,
            workers: Vec::new(),
            run_counter: 0,
            ret_code: 0,
            aff_id,
            mask: req.mask,
            input: req.input.clone(),
            output: String::new(),
            tags: req.tags.clone(),
            err_msg: String::new(),
            progress_msg: String::new(),
        }
    }

    #[inline]
    pub fn effective_timeout(&self, params: &QueueParams) -> u64 {
        if self.timeout > 0 {
            self.timeout
        } else {
            params.timeout
        }
    }

    #[inline]
    pub fn effective_run_timeout(&self, params: &QueueParams) -> u64 {
        if self.run_timeout > 0 {
            self.run_timeout
        } else {
            params.run_timeout
        }
    }

    /// A job not picked up within its lifetime can no longer be scheduled.
    pub fn is_expired_for_dispatch(&self, params: &QueueParams, now: u64) -> bool {
        let ttl = self.effective_timeout(params);
        ttl > 0 && self.time_submit.saturating_add(ttl) < now
    }

    /// Instant after which the reaper may delete this record. A zero
    /// lifetime never expires, matching `is_expired_for_dispatch`.
    pub fn purge_deadline(&self, params: &QueueParams) -> u64 {
        let ttl = self.effective_timeout(params);
        if ttl == 0 {
            return u64::MAX;
        }
        match self.status {
            JobStatus::Running => self.time_run.saturating_add(ttl),
            JobStatus::Pending => self.time_submit.saturating_add(ttl),
            _ if self.time_done > 0 => self.time_done.saturating_add(ttl),
            _ => self.time_submit.saturating_add(ttl.saturating_mul(10)),
        }
    }

    /// True while the submitter still waits for a push notification.
    pub fn submitter_waiting(&self, now: u64) -> bool {
        self.subm_addr.is_some()
            && self.subm_port != 0
            && self.subm_timeout > 0
            && self.time_submit.saturating_add(self.subm_timeout) >= now
    }

    pub fn push_worker(&mut self, worker: String) {
        self.workers.push(worker);
        if self.workers.len() > MAX_WORKER_NODES {
            let excess = self.workers.len() - MAX_WORKER_NODES;
            self.workers.drain(..excess);
        }
    }

    pub fn last_worker(&self) -> Option<&str> {
        self.workers.last().map(String::as_str)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Where to push the "job done" datagram for a waiting submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterNotify {
    pub addr: String,
    pub port: u16,
    /// Seconds after submission during which the submitter waits
    pub timeout: u64,
}

/// Submission request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub input: String,
    #[serde(default)]
    pub affinity: Option<String>,
    #[serde(default)]
    pub mask: u64,
    #[serde(default)]
    pub tags: Vec<(String, String)>,
    #[serde(default)]
    pub notify: Option<SubmitterNotify>,
    #[serde(default)]
    pub timeout: u64,
}

impl SubmitRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_affinity(mut self, token: impl Into<String>) -> Self {
        self.affinity = Some(token.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }
}

/// Identity of a connected client (submitter or worker node).
///
/// A worker with a stable `node_id` keeps its affinity and blacklist state
/// across reconnects; without one it is identified by host and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub node_id: Option<String>,
    /// "name major.minor.patch"
    #[serde(default)]
    pub program: Option<String>,
}

impl Client {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 0,
            node_id: None,
            program: None,
        }
    }

    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Key used for affinity and blacklist bookkeeping.
    pub fn key(&self) -> String {
        match &self.node_id {
            Some(id) => id.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchedJob {
    pub id: u64,
    pub input: String,
    pub mask: u64,
    pub affinity: Option<String>,
}

/// Full job description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescr {
    pub status: ObservedStatus,
    pub affinity: Option<String>,
    pub record: JobRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueKind {
    /// Defined in configuration, cannot be deleted administratively
    Static,
    /// Created at runtime from a class
    Dynamic,
}

impl QueueKind {
    pub fn code(self) -> i64 {
        match self {
            QueueKind::Static => 0,
            QueueKind::Dynamic => 1,
        }
    }

    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            QueueKind::Static
        } else {
            QueueKind::Dynamic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueInfo {
    pub name: String,
    pub kind: QueueKind,
    pub class: String,
    pub comment: String,
}

/// Parse a client's program string against a version gate.
pub(crate) fn client_version(client: &Client) -> Option<ProgramVersion> {
    client
        .program
        .as_deref()
        .and_then(|p| ProgramVersion::parse(p).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(JobStatus::from_code(7), None);
        assert_eq!(JobStatus::from_code(-1), None);
    }

    #[test]
    fn test_returned_label() {
        assert_eq!(
            ObservedStatus::new(JobStatus::Pending, true),
            ObservedStatus::Returned
        );
        assert_eq!(
            ObservedStatus::new(JobStatus::Running, true),
            ObservedStatus::Running
        );
        assert_eq!(ObservedStatus::Returned.persisted(), JobStatus::Pending);
        assert_eq!("returned".parse::<ObservedStatus>().unwrap(), ObservedStatus::Returned);
        assert!("bogus".parse::<ObservedStatus>().is_err());
    }

    #[test]
    fn test_worker_history_is_bounded() {
        let mut job = JobRecord::new(1, &SubmitRequest::new("x"), 0, 100);
        for i in 0..8 {
            job.push_worker(format!("w{}", i));
        }
        assert_eq!(job.workers.len(), MAX_WORKER_NODES);
        assert_eq!(job.workers[0], "w3");
        assert_eq!(job.last_worker(), Some("w7"));
    }

    #[test]
    fn test_purge_deadline() {
        let params = QueueParams {
            timeout: 100,
            ..Default::default()
        };
        let mut job = JobRecord::new(1, &SubmitRequest::new("x"), 0, 1000);
        assert_eq!(job.purge_deadline(&params), 1100);

        job.status = JobStatus::Done;
        job.time_done = 2000;
        assert_eq!(job.purge_deadline(&params), 2100);

        job.time_done = 0;
        assert_eq!(job.purge_deadline(&params), 2000);

        job.status = JobStatus::Running;
        job.time_run = 1500;
        job.timeout = 10;
        assert_eq!(job.purge_deadline(&params), 1510);
    }

    #[test]
    fn test_zero_lifetime_never_expires() {
        let params = QueueParams {
            timeout: 0,
            ..Default::default()
        };
        let mut job = JobRecord::new(1, &SubmitRequest::new("x"), 0, 1000);
        assert_eq!(job.purge_deadline(&params), u64::MAX);
        assert!(!job.is_expired_for_dispatch(&params, u64::MAX));

        job.status = JobStatus::Done;
        job.time_done = 2000;
        assert_eq!(job.purge_deadline(&params), u64::MAX);
    }

    #[test]
    fn test_submitter_waiting() {
        let req = SubmitRequest {
            notify: Some(SubmitterNotify {
                addr: "127.0.0.1".to_string(),
                port: 9000,
                timeout: 30,
            }),
            ..SubmitRequest::new("x")
        };
        let job = JobRecord::new(1, &req, 0, 1000);
        assert!(job.submitter_waiting(1030));
        assert!(!job.submitter_waiting(1031));
    }

    #[test]
    fn test_client_key() {
        assert_eq!(Client::new("host").with_port(9100).key(), "host:9100");
        assert_eq!(Client::new("host").with_node_id("wn-1").key(), "wn-1");
    }
}
