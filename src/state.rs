//! Process-Wide Shared State
//!
//! Everything the connection handlers, the greylist engine, the background
//! tasks and the config manager share lives in one explicitly owned
//! [`SharedState`] container, passed around as an `Arc`.
//!
//! ## Locking Policy
//!
//! Each field carries its own dedicated lock (or is an atomic); there is no
//! global lock. No operation in this crate ever holds more than one of these
//! locks at a time, which is what keeps the whole daemon deadlock-free, and
//! no `std` mutex is held across an await point.
//!
//! Hot tunables (`debug`, `grey_listing`, delays) are atomics so that every
//! reader observes each parameter update atomically. Cross-parameter
//! atomicity is deliberately not provided: an in-flight request may see the
//! delay from before a reload and the expiry from after it.

use crate::store::{InternalStore, StoreBackend};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Parsed "hot" tunables, read on every request.
///
/// Defaults mirror the shipped configuration defaults: debug logging on,
/// greylisting off, 300 second delay, 4 hour expiry, statistics disabled.
#[derive(Debug)]
pub struct Settings {
    debug: AtomicBool,
    greylisting: AtomicBool,
    delay_secs: AtomicI64,
    expire_secs: AtomicI64,
    stat_interval_secs: AtomicU64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: AtomicBool::new(true),
            greylisting: AtomicBool::new(false),
            delay_secs: AtomicI64::new(300),
            expire_secs: AtomicI64::new(14400),
            stat_interval_secs: AtomicU64::new(0),
        }
    }
}

impl Settings {
    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_debug(&self, on: bool) {
        self.debug.store(on, Ordering::Relaxed);
    }

    pub fn greylisting(&self) -> bool {
        self.greylisting.load(Ordering::Relaxed)
    }

    pub fn set_greylisting(&self, on: bool) {
        self.greylisting.store(on, Ordering::Relaxed);
    }

    pub fn delay_secs(&self) -> i64 {
        self.delay_secs.load(Ordering::Relaxed)
    }

    pub fn set_delay_secs(&self, secs: i64) {
        self.delay_secs.store(secs, Ordering::Relaxed);
    }

    pub fn expire_secs(&self) -> i64 {
        self.expire_secs.load(Ordering::Relaxed)
    }

    pub fn set_expire_secs(&self, secs: i64) {
        self.expire_secs.store(secs, Ordering::Relaxed);
    }

    pub fn stat_interval_secs(&self) -> u64 {
        self.stat_interval_secs.load(Ordering::Relaxed)
    }

    pub fn set_stat_interval_secs(&self, secs: u64) {
        self.stat_interval_secs.store(secs, Ordering::Relaxed);
    }
}

/// Registry of running background tasks, keyed by name.
///
/// Starting the greylist sweeper or the stats collector goes through this
/// registry so that a second start while one is already running is a no-op.
/// A task deregisters itself when it terminates.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    running: Mutex<HashSet<&'static str>>,
}

impl TaskRegistry {
    /// Claims `name`. Returns `false` if a task with this name already runs.
    pub fn try_register(&self, name: &'static str) -> bool {
        self.running.lock().unwrap().insert(name)
    }

    pub fn deregister(&self, name: &'static str) {
        self.running.lock().unwrap().remove(name);
    }

    pub fn is_running(&self, name: &'static str) -> bool {
        self.running.lock().unwrap().contains(name)
    }
}

/// Counters for the statistics collector.
///
/// The connection counter stands alone as an atomic. The request counter and
/// the accumulated request duration are read and reset together when the
/// statistics line is printed, so they stay a pair behind one lock - swapping
/// them independently would skew the average.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connections: AtomicU64,
    requests: Mutex<RequestWindow>,
}

#[derive(Debug, Default, Clone, Copy)]
struct RequestWindow {
    count: u64,
    duration: Duration,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulates one handled request and the time it took.
    pub fn record_request(&self, took: Duration) {
        let mut window = self.requests.lock().unwrap();
        window.count += 1;
        window.duration += took;
    }

    /// Returns the connection count since the last call and resets it.
    pub fn take_connections(&self) -> u64 {
        self.connections.swap(0, Ordering::Relaxed)
    }

    /// Returns (request count, accumulated duration) since the last call
    /// and resets both.
    pub fn take_requests(&self) -> (u64, Duration) {
        let window = std::mem::take(&mut *self.requests.lock().unwrap());
        (window.count, window.duration)
    }
}

/// The shared state container handed to every component.
#[derive(Debug)]
pub struct SharedState {
    /// Parsed hot tunables
    pub settings: Settings,

    /// Raw textual configuration values, current after the last apply
    cfg: Mutex<HashMap<String, String>>,

    /// The selected greylist store backend
    store: Mutex<StoreBackend>,

    /// Textual IP addresses of the local interfaces, exempt from greylisting
    local_addrs: Mutex<HashSet<String>>,

    /// Running background tasks
    pub tasks: TaskRegistry,

    /// Shared counters for the statistics collector
    pub stats: ConnectionStats,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// Creates the state container with built-in configuration defaults and
    /// an (empty) internal store backend.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            cfg: Mutex::new(crate::config::defaults()),
            store: Mutex::new(StoreBackend::Internal(Arc::new(InternalStore::new()))),
            local_addrs: Mutex::new(HashSet::new()),
            tasks: TaskRegistry::default(),
            stats: ConnectionStats::new(),
        }
    }

    /// Returns the current textual value of a configuration parameter.
    pub fn cfg_value(&self, name: &str) -> Option<String> {
        self.cfg.lock().unwrap().get(name).cloned()
    }

    /// Stores the textual value of a configuration parameter.
    pub fn set_cfg_value(&self, name: &str, value: &str) {
        self.cfg.lock().unwrap().insert(name.to_string(), value.to_string());
    }

    /// The `listen_ip:listen_port` pair the server binds to.
    pub fn listen_addr(&self) -> String {
        let cfg = self.cfg.lock().unwrap();
        format!(
            "{}:{}",
            cfg.get("listen_ip")
                .map(String::as_str)
                .unwrap_or(crate::DEFAULT_HOST),
            cfg.get("listen_port")
                .cloned()
                .unwrap_or_else(|| crate::DEFAULT_PORT.to_string()),
        )
    }

    /// Returns a handle to the currently selected store backend.
    ///
    /// The enum variants hold `Arc`s, so this is a cheap clone; callers must
    /// clone the handle out instead of holding the slot lock across awaits.
    pub fn backend(&self) -> StoreBackend {
        self.store.lock().unwrap().clone()
    }

    /// Replaces the store backend. The previous handle is dropped here; a
    /// running sweeper keeps its own `Arc` and notices the drift on its next
    /// wake.
    pub fn set_backend(&self, backend: StoreBackend) {
        *self.store.lock().unwrap() = backend;
    }

    /// True if the current backend is this exact internal store.
    ///
    /// Identity (not equality) is what the sweeper's drift detection needs:
    /// a fresh internal store installed after a round-trip through memcached
    /// must not be mistaken for the one the old sweeper was started with.
    pub fn backend_is(&self, store: &Arc<InternalStore>) -> bool {
        match &*self.store.lock().unwrap() {
            StoreBackend::Internal(current) => Arc::ptr_eq(current, store),
            StoreBackend::Memcached(_) => false,
        }
    }

    /// True if `addr` is one of this host's interface addresses.
    pub fn is_local_addr(&self, addr: &str) -> bool {
        self.local_addrs.lock().unwrap().contains(addr)
    }

    /// Replaces the local interface address set.
    pub fn set_local_addrs(&self, addrs: HashSet<String>) {
        *self.local_addrs.lock().unwrap() = addrs;
    }
}
