//! Named queues and their lifecycle.
//!
//! Callers resolve a queue by name on every access; a deleted queue simply
//! stops resolving (`UnknownQueue`), and any `Arc<Queue>` still held by an
//! in-flight call reports `UnknownQueue` on its next operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use compact_str::CompactString;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::manager::Queue;
use super::sqlite::{remove_database_files, SqliteConfig, SysQueueRow, SysStore};
use super::types::now_secs;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedError};
use crate::protocol::{QueueInfo, QueueKind};

/// Registry database file name.
pub const SYS_DB_FILE: &str = "netsched_sys.db";

const MAX_QUEUE_NAME_LEN: usize = 32;

/// Validate a queue name: 1-32 ASCII letters, digits, `_` or `-`.
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN {
        return Err(SchedError::InvalidArgument(format!(
            "queue name must be 1-{} characters: {:?}",
            MAX_QUEUE_NAME_LEN, name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SchedError::InvalidArgument(format!(
            "queue name contains invalid characters: {:?}",
            name
        )));
    }
    Ok(())
}

pub struct QueueRegistry {
    pub(crate) config: RwLock<SchedulerConfig>,
    sys: SysStore,
    queues: RwLock<HashMap<CompactString, Arc<Queue>>>,
    shutdown_flag: AtomicBool,
}

impl QueueRegistry {
    /// Open the registry: mount every static queue from the configuration
    /// and every dynamic queue recorded in the registry database.
    pub fn open(config: SchedulerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let sys = SysStore::open(SqliteConfig::from_storage(&config.storage, SYS_DB_FILE))?;

        let registry = Self {
            config: RwLock::new(config),
            sys,
            queues: RwLock::new(HashMap::new()),
            shutdown_flag: AtomicBool::new(false),
        };

        let statics: Vec<(String, String)> = registry
            .config
            .read()
            .queues
            .iter()
            .map(|(q, c)| (q.clone(), c.clone()))
            .collect();
        for (name, class) in statics {
            registry.mount_static(&name, &class)?;
        }

        for row in registry.sys.load_queues()? {
            if row.kind != QueueKind::Dynamic {
                continue;
            }
            if registry.queues.read().contains_key(row.name.as_str()) {
                warn!(queue = %row.name, "Dynamic queue shadowed by a static one");
                continue;
            }
            let params = registry.config.read().class(&row.class).cloned();
            let Some(params) = params else {
                warn!(queue = %row.name, class = %row.class, "Queue class no longer defined, queue not mounted");
                continue;
            };
            let queue = registry.mount(&row.name, QueueKind::Dynamic, &row.class, &row.comment, params)?;
            registry
                .queues
                .write()
                .insert(CompactString::from(row.name.as_str()), Arc::new(queue));
        }

        info!(queues = registry.queues.read().len(), "Queue registry opened");
        Ok(Arc::new(registry))
    }

    fn mount(
        &self,
        name: &str,
        kind: QueueKind,
        class: &str,
        comment: &str,
        params: crate::config::QueueParams,
    ) -> Result<Queue> {
        let config = self.config.read();
        Queue::mount(
            name,
            kind,
            class,
            comment,
            params,
            &config.storage,
            config.background.retry_bound,
        )
    }

    fn mount_static(&self, name: &str, class: &str) -> Result<()> {
        validate_queue_name(name)?;
        let params = self
            .config
            .read()
            .class(class)
            .cloned()
            .ok_or_else(|| SchedError::UnknownQueueClass(class.to_string()))?;
        let comment = params.description.clone();
        let queue = self.mount(name, QueueKind::Static, class, &comment, params)?;
        self.sys.upsert_queue(
            &SysQueueRow {
                name: name.to_string(),
                kind: QueueKind::Static,
                class: class.to_string(),
                comment,
            },
            now_secs(),
        )?;
        self.queues
            .write()
            .insert(CompactString::from(name), Arc::new(queue));
        Ok(())
    }

    /// Resolve a live queue.
    pub fn queue(&self, name: &str) -> Result<Arc<Queue>> {
        self.queues
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SchedError::UnknownQueue(name.to_string()))
    }

    /// Names of all live queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    pub(crate) fn live_queues(&self) -> Vec<Arc<Queue>> {
        self.queues.read().values().cloned().collect()
    }

    pub fn queue_info(&self, name: &str) -> Result<QueueInfo> {
        Ok(self.queue(name)?.info())
    }

    /// Create a dynamic queue from a class.
    pub fn create_queue(&self, name: &str, class: &str, comment: &str) -> Result<Arc<Queue>> {
        validate_queue_name(name)?;
        let params = self
            .config
            .read()
            .class(class)
            .cloned()
            .ok_or_else(|| SchedError::UnknownQueueClass(class.to_string()))?;

        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Err(SchedError::DuplicateName(name.to_string()));
        }
        let queue = Arc::new(self.mount(name, QueueKind::Dynamic, class, comment, params)?);
        self.sys.upsert_queue(
            &SysQueueRow {
                name: name.to_string(),
                kind: QueueKind::Dynamic,
                class: class.to_string(),
                comment: comment.to_string(),
            },
            now_secs(),
        )?;
        queues.insert(CompactString::from(name), Arc::clone(&queue));
        info!(queue = %name, class = %class, "Queue created");
        Ok(queue)
    }

    /// Delete a dynamic queue and its storage. Static queues are refused.
    pub fn delete_queue(&self, name: &str) -> Result<()> {
        let queue = {
            let mut queues = self.queues.write();
            let queue = queues
                .get(name)
                .cloned()
                .ok_or_else(|| SchedError::UnknownQueue(name.to_string()))?;
            if queue.kind() == QueueKind::Static {
                return Err(SchedError::AccessDenied(format!(
                    "queue {} is defined in configuration and cannot be deleted",
                    name
                )));
            }
            queue.retire(false)?;
            queues.remove(name);
            queue
        };
        self.drop_storage(&queue)?;
        info!(queue = %name, "Queue deleted");
        Ok(())
    }

    fn drop_storage(&self, queue: &Queue) -> Result<()> {
        self.sys.delete_queue(queue.name())?;
        remove_database_files(&queue.store.path)?;
        Ok(())
    }

    /// Re-read class parameters into live queues and mount newly listed
    /// static queues.
    pub fn configure(&self, config: SchedulerConfig) -> Result<()> {
        config.validate()?;
        for queue in self.live_queues() {
            match config.class(&queue.class) {
                Some(params) => {
                    queue.set_params(params.clone())?;
                    if queue.kind() == QueueKind::Static {
                        queue.set_comment(&params.description);
                    }
                }
                None => warn!(
                    queue = %queue.name(),
                    class = %queue.class,
                    "Queue class removed from configuration, keeping old parameters"
                ),
            }
        }

        let new_statics: Vec<(String, String)> = config
            .queues
            .iter()
            .filter(|(name, _)| !self.queues.read().contains_key(name.as_str()))
            .map(|(q, c)| (q.clone(), c.clone()))
            .collect();
        {
            let mut current = self.config.write();
            current.classes = config.classes;
            current.queues = config.queues;
            current.background = config.background;
        }
        for (name, class) in new_statics {
            self.mount_static(&name, &class)?;
            info!(queue = %name, class = %class, "Static queue mounted");
        }
        Ok(())
    }

    /// Delete dynamic queues that stayed empty for their idle lifetime.
    pub(crate) fn expire_idle_queues(&self, now: u64) -> usize {
        let mut expired = 0;
        for queue in self.live_queues() {
            if queue.kind() != QueueKind::Dynamic {
                continue;
            }
            let lifetime = queue.params.read().empty_lifetime;
            if lifetime <= 0 {
                continue;
            }
            if queue.job_count() > 0 {
                queue.empty_since.store(0, Ordering::Relaxed);
                continue;
            }
            let since = queue.empty_since.load(Ordering::Relaxed);
            if since == 0 {
                queue.empty_since.store(now, Ordering::Relaxed);
                continue;
            }
            if now.saturating_sub(since) < lifetime as u64 {
                continue;
            }

            let removed = {
                let mut queues = self.queues.write();
                // A submit that committed before the retire keeps the queue.
                // One that comes later fails with UnknownQueue.
                match queue.retire(true) {
                    Ok(true) => queues.remove(queue.name()).is_some(),
                    Ok(false) => false,
                    Err(e) => {
                        warn!(queue = %queue.name(), error = %e, "Idle queue check failed");
                        false
                    }
                }
            };
            if removed {
                if let Err(e) = self.drop_storage(&queue) {
                    error!(queue = %queue.name(), error = %e, "Failed to remove idle queue storage");
                }
                info!(queue = %queue.name(), idle_secs = now - since, "Idle queue removed");
                expired += 1;
            }
        }
        expired
    }

    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }
}
