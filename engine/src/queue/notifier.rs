//! Worker listener registry and best-effort UDP notifications.
//!
//! Two kinds of datagram are sent:
//! - `JSQ_<queue>` to registered listeners when work becomes available
//! - `JNTF <job id>` to a submitter waiting for its job to finish
//!
//! Delivery is never retried; workers still poll.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Check for "nothing pending" every this many listeners.
const PENDING_RECHECK_EVERY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerListener {
    pub host: String,
    pub port: u16,
    /// Seconds the registration stays valid after the last contact
    pub timeout: u64,
    pub last_contact: u64,
}

impl WorkerListener {
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.last_contact.saturating_add(self.timeout) < now
    }
}

pub struct Notifier {
    message: String,
    listeners: Mutex<Vec<WorkerListener>>,
    socket: Mutex<Option<UdpSocket>>,
    last_notif: AtomicU64,
}

impl Notifier {
    pub fn new(queue: &str) -> Self {
        Self {
            message: format!("JSQ_{}", queue),
            listeners: Mutex::new(Vec::new()),
            socket: Mutex::new(None),
            last_notif: AtomicU64::new(0),
        }
    }

    /// Register or refresh a listener. A zero timeout unregisters it.
    pub fn register(&self, host: &str, port: u16, timeout: u64, now: u64) {
        let mut listeners = self.listeners.lock();
        let existing = listeners
            .iter()
            .position(|l| l.port == port && l.host == host);
        match (existing, timeout) {
            (Some(pos), 0) => {
                listeners.swap_remove(pos);
            }
            (Some(pos), _) => {
                let l = &mut listeners[pos];
                l.timeout = timeout;
                l.last_contact = now;
            }
            (None, 0) => {}
            (None, _) => listeners.push(WorkerListener {
                host: host.to_string(),
                port,
                timeout,
                last_contact: now,
            }),
        }
    }

    pub fn unregister(&self, host: &str, port: u16) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !(l.port == port && l.host == host));
        listeners.len() != before
    }

    pub fn listeners(&self) -> Vec<WorkerListener> {
        self.listeners.lock().clone()
    }

    /// Drop listeners whose timeout lapsed. Returns how many were removed.
    pub fn prune(&self, now: u64) -> usize {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !l.is_expired(now));
        before - listeners.len()
    }

    /// Send the "work available" datagram to live listeners.
    ///
    /// Unless `force` is set, at most one round per `throttle` seconds is
    /// sent. `has_pending` is re-evaluated periodically so a long listener
    /// list stops once the backlog is drained.
    pub fn notify_listeners<F>(&self, throttle: u64, now: u64, force: bool, has_pending: F) -> usize
    where
        F: Fn() -> bool,
    {
        if throttle == 0 && !force {
            return 0;
        }
        if !force {
            let last = self.last_notif.load(Ordering::Relaxed);
            if last.saturating_add(throttle) > now {
                return 0;
            }
        }
        self.last_notif.store(now, Ordering::Relaxed);

        let targets: Vec<(String, u16)> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| !l.is_expired(now))
            .map(|l| (l.host.clone(), l.port))
            .collect();

        let mut sent = 0;
        for (i, (host, port)) in targets.iter().enumerate() {
            if i > 0 && i % PENDING_RECHECK_EVERY == 0 && !has_pending() {
                break;
            }
            if self.send(host, *port, self.message.as_bytes()) {
                sent += 1;
            }
        }
        sent
    }

    /// Tell a waiting submitter its job finished.
    pub fn notify_submitter(&self, addr: &str, port: u16, job_id: u64) -> bool {
        self.send(addr, port, format!("JNTF {}", job_id).as_bytes())
    }

    fn send(&self, host: &str, port: u16, payload: &[u8]) -> bool {
        // Name lookups may block, so they happen before taking the socket.
        let Some(addr) = resolve(host, port) else {
            return false;
        };
        let mut guard = self.socket.lock();
        if guard.is_none() {
            match UdpSocket::bind("0.0.0.0:0") {
                Ok(s) => {
                    if let Err(e) = s.set_nonblocking(true) {
                        warn!(error = %e, "Failed to make notification socket non-blocking");
                    }
                    *guard = Some(s);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to bind notification socket");
                    return false;
                }
            }
        }
        let Some(socket) = guard.as_ref() else {
            return false;
        };
        match socket.send_to(payload, addr) {
            Ok(_) => true,
            Err(e) => {
                debug!(host = %host, port, error = %e, "Notification not delivered");
                false
            }
        }
    }
}

/// First IPv4 address of `host`, the notification socket being IPv4.
fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => {
            let addr = addrs.find(SocketAddr::is_ipv4);
            if addr.is_none() {
                debug!(host = %host, "No IPv4 address for listener");
            }
            addr
        }
        Err(e) => {
            debug!(host = %host, error = %e, "Listener address not resolved");
            None
        }
    }
}
