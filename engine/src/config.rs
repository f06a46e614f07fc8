//! Scheduler configuration.
//!
//! Loaded from a TOML document with `[storage]`, `[background]`,
//! `[classes.<name>]` and `[queues]` sections, then overridden from the
//! environment. Queue classes are templates: every queue created from a
//! class receives a copy of its `QueueParams`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, SchedError};
use crate::queue::retry::DEFAULT_RETRY_BOUND;

/// Hard cap for any configured payload limit.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Storage settings shared by every queue database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one SQLite file per queue plus the registry database
    pub data_dir: PathBuf,
    /// Enable WAL mode (recommended)
    pub wal_mode: bool,
    /// Synchronous mode: 0=OFF, 1=NORMAL, 2=FULL
    pub synchronous: i32,
    /// Cache size in pages (negative = KB)
    pub cache_size: i32,
    /// Payloads longer than this go to the overflow table
    pub overflow_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            wal_mode: true,
            synchronous: 1,
            cache_size: -16000,
            overflow_threshold: 256,
        }
    }
}

/// Background loop cadence and batch limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub purge_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    pub notify_interval_secs: u64,
    /// Records examined per status per reaper batch
    pub purge_batch_size: usize,
    /// Upper bound on deletions per queue per reaper pass
    pub max_deletes_per_pass: usize,
    /// Attempts before a contended transaction is reported as failed
    pub retry_bound: u32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: 5,
            watchdog_interval_secs: 1,
            notify_interval_secs: 1,
            purge_batch_size: 100,
            max_deletes_per_pass: 1000,
            retry_bound: DEFAULT_RETRY_BOUND,
        }
    }
}

/// Parameters of a queue class. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueParams {
    /// Record lifetime, counted from completion (or submission if never run)
    pub timeout: u64,
    /// Execution deadline for a running job, 0 disables the watchdog
    pub run_timeout: u64,
    /// Timeline slot width
    pub run_timeout_precision: u64,
    /// Minimum interval between listener notifications, 0 disables them
    pub notif_timeout: u64,
    pub max_input_size: usize,
    pub max_output_size: usize,
    pub delete_done: bool,
    /// Worker-reported failures tolerated before a job turns Failed
    pub failed_retries: u32,
    /// How long a worker stays blacklisted for a job it failed
    pub blacklist_time: u64,
    /// Dispatch attempts before a job turns Failed
    pub max_run_attempts: u32,
    /// Silence after which a worker's affinity claims and blacklist are
    /// forgotten, 0 keeps them forever
    pub wnode_timeout: u64,
    /// Idle lifetime of an empty dynamic queue, <= 0 disables expiry
    pub empty_lifetime: i64,
    pub subm_hosts: Vec<String>,
    pub wnode_hosts: Vec<String>,
    /// Client version gate, e.g. "worker_node 1.2.0; submitter 2.0.0"
    pub program: String,
    pub description: String,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self {
            timeout: 3600,
            run_timeout: 3600,
            run_timeout_precision: 1,
            notif_timeout: 7,
            max_input_size: 2048,
            max_output_size: 2048,
            delete_done: false,
            failed_retries: 0,
            blacklist_time: 600,
            max_run_attempts: 5,
            wnode_timeout: 40,
            empty_lifetime: -1,
            subm_hosts: Vec::new(),
            wnode_hosts: Vec::new(),
            program: String::new(),
            description: String::new(),
        }
    }
}

impl QueueParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_input_size > MAX_PAYLOAD_SIZE || self.max_output_size > MAX_PAYLOAD_SIZE {
            return Err(SchedError::Config(format!(
                "payload limits must not exceed {} bytes",
                MAX_PAYLOAD_SIZE
            )));
        }
        if self.timeout == 0 {
            return Err(SchedError::Config("timeout must be positive".to_string()));
        }
        if self.run_timeout_precision == 0 {
            return Err(SchedError::Config(
                "run_timeout_precision must be positive".to_string(),
            ));
        }
        self.version_gate().map(|_| ())
    }

    /// Parse the `program` gate into its entries.
    pub fn version_gate(&self) -> Result<Vec<ProgramVersion>> {
        self.program
            .split(|c| c == ';' || c == ',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ProgramVersion::parse)
            .collect()
    }

    pub fn submitter_allowed(&self, host: &str) -> bool {
        host_allowed(&self.subm_hosts, host)
    }

    pub fn worker_allowed(&self, host: &str) -> bool {
        host_allowed(&self.wnode_hosts, host)
    }
}

fn host_allowed(list: &[String], host: &str) -> bool {
    list.is_empty() || list.iter().any(|h| h.eq_ignore_ascii_case(host))
}

/// A `name major.minor.patch` entry of a version gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramVersion {
    pub name: String,
    pub version: (u32, u32, u32),
}

impl ProgramVersion {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, version) = s
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| SchedError::Config(format!("invalid program version: {}", s)))?;
        let mut parts = version.trim().split('.').map(|p| p.parse::<u32>());
        let mut next = || -> Result<u32> {
            match parts.next() {
                None => Ok(0),
                Some(Ok(v)) => Ok(v),
                Some(Err(_)) => Err(SchedError::Config(format!(
                    "invalid program version: {}",
                    s
                ))),
            }
        };
        let version = (next()?, next()?, next()?);
        Ok(Self {
            name: name.trim().to_string(),
            version,
        })
    }

    /// True if `client` names the same program at this version or newer.
    pub fn admits(&self, client: &ProgramVersion) -> bool {
        self.name.eq_ignore_ascii_case(&client.name) && client.version >= self.version
    }
}

/// Complete scheduler configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub storage: StorageConfig,
    pub background: BackgroundConfig,
    pub classes: BTreeMap<String, QueueParams>,
    /// Static queues: queue name to class name
    pub queues: BTreeMap<String, String>,
}

impl SchedulerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SchedulerConfig =
            toml::from_str(s).map_err(|e| SchedError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        info!(
            path = %path.display(),
            classes = config.classes.len(),
            queues = config.queues.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Override storage settings from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("NETSCHED_DATA_PATH") {
            self.storage.data_dir = PathBuf::from(path);
        }
        if let Some(v) = std::env::var("SQLITE_SYNCHRONOUS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.storage.synchronous = v;
        }
        if let Some(v) = std::env::var("SQLITE_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.storage.cache_size = v;
        }
    }

    pub fn class(&self, name: &str) -> Option<&QueueParams> {
        self.classes.get(name)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, params) in &self.classes {
            params
                .validate()
                .map_err(|e| SchedError::Config(format!("class {}: {}", name, e)))?;
        }
        for (queue, class) in &self.queues {
            if !self.classes.contains_key(class) {
                return Err(SchedError::UnknownQueueClass(format!(
                    "{} (queue {})",
                    class, queue
                )));
            }
        }
        Ok(())
    }
}
