//! Per-function usage statistics
//!
//! Every wrapped function records one [`FuncCallEvent`] per call into a
//! [`Registry`]. A registry starts in local mode and can be switched once into
//! multiprocess mode, where worker processes push deltas to a coordinator
//! process over UDP (see [`crate::multiprocess`]).

use crate::{
    config::Settings,
    multiprocess::{self, Contributor, Coordinator, Message},
    result::{KIND_CANCELLED, KIND_PANIC, Result, SqlFnError},
    strategy::ResultShape,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};

/// Default period between two delta pushes of a worker process
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry used by decorators that were not given one explicitly
pub fn get_registry() -> &'static Registry {
    &REGISTRY
}

/// Accumulated statistics of one wrapped function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub calls: u64,
    /// Time spent executing queries and extracting rows
    pub duration: Duration,
    /// Rows retrieved; always zero for iterate shapes
    pub tuples: u64,
    pub fails: u64,
    pub fails_by_error: BTreeMap<String, u64>,
}

impl UsageRecord {
    pub fn apply(&mut self, event: &FuncCallEvent) {
        self.calls += 1;
        self.duration += event.duration.unwrap_or_default();
        self.tuples += event.tuples;
        if let Some(error) = &event.error {
            self.fails += 1;
            *self.fails_by_error.entry(error.clone()).or_insert(0) += 1;
        }
    }

    /// Field-wise sum; commutative, so merge order never changes the totals
    pub fn merge(&mut self, other: &UsageRecord) {
        self.calls += other.calls;
        self.duration += other.duration;
        self.tuples += other.tuples;
        self.fails += other.fails;
        for (kind, count) in &other.fails_by_error {
            *self.fails_by_error.entry(kind.clone()).or_insert(0) += count;
        }
    }
}

/// One finished call of a wrapped function
#[derive(Debug, Clone, PartialEq)]
pub struct FuncCallEvent {
    pub func_name: String,
    pub duration: Option<Duration>,
    pub tuples: u64,
    /// Error kind when the call failed
    pub error: Option<String>,
}

/// Callback notified of every event recorded in this process
pub type EventListener = Box<dyn Fn(&FuncCallEvent) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle state of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Local,
    Coordinator,
    Worker,
}

/// Role taken by `init_multiprocess_registry`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiprocessRole {
    /// This process owns the shared aggregate and listens on the address
    Coordinator(SocketAddr),
    /// This process pushes deltas to the coordinator at the address
    Worker(SocketAddr),
}

#[derive(Default)]
struct Stats {
    func_names: BTreeSet<String>,
    stat_by_name: HashMap<String, UsageRecord>,
}

enum Mode {
    Local,
    Coordinator(Coordinator),
    Worker(Contributor),
}

struct RegistryInner {
    stats: Mutex<Stats>,
    listeners: RwLock<Vec<EventListener>>,
    mode: Mutex<Mode>,
    flush_interval: Mutex<Duration>,
}

/// Table of usage records keyed by qualified function name
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: Arc::new(RegistryInner {
                stats: Mutex::new(Stats::default()),
                listeners: RwLock::new(Vec::new()),
                mode: Mutex::new(Mode::Local),
                flush_interval: Mutex::new(DEFAULT_FLUSH_INTERVAL),
            }),
        }
    }

    /// Whether two handles point at the same registry
    pub fn same_as(&self, other: &Registry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn mode(&self) -> RegistryMode {
        match &*lock(&self.inner.mode) {
            Mode::Local => RegistryMode::Local,
            Mode::Coordinator(_) => RegistryMode::Coordinator,
            Mode::Worker(_) => RegistryMode::Worker,
        }
    }

    /// Period between delta pushes; only read when a worker starts
    pub fn set_flush_interval(&self, interval: Duration) {
        *lock(&self.inner.flush_interval) = interval;
    }

    pub fn flush_interval(&self) -> Duration {
        *lock(&self.inner.flush_interval)
    }

    /// Take the registry-level values of loaded settings
    ///
    /// Call before switching into multiprocess mode; a running worker keeps
    /// the interval it started with.
    pub fn apply_settings(&self, settings: &Settings) {
        self.set_flush_interval(settings.flush_interval);
    }

    /// Make a function name known; decorators call this when wrapping
    pub fn register(&self, name: &str) {
        lock(&self.inner.stats).func_names.insert(name.to_string());
        if let Mode::Worker(contributor) = &*lock(&self.inner.mode) {
            contributor.register(name);
        }
    }

    pub fn func_names(&self) -> BTreeSet<String> {
        lock(&self.inner.stats).func_names.clone()
    }

    pub fn add_event_listener<F>(&self, listener: F)
    where
        F: Fn(&FuncCallEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(listener));
    }

    /// Record one finished call
    ///
    /// In worker mode the event only lands in the local delta buffer.
    pub fn record(&self, event: FuncCallEvent) {
        if let Mode::Worker(contributor) = &*lock(&self.inner.mode) {
            contributor.buffer(&event);
            return;
        }

        {
            let mut stats = lock(&self.inner.stats);
            stats.func_names.insert(event.func_name.clone());
            stats
                .stat_by_name
                .entry(event.func_name.clone())
                .or_default()
                .apply(&event);
        }
        self.notify(&event);
    }

    fn notify(&self, event: &FuncCallEvent) {
        let listeners = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            if let Err(e) = listener(event) {
                tracing::warn!(func = %event.func_name, error = %e, "registry event listener failed");
            }
        }
    }

    /// Add a delta contributed by another process
    pub fn merge(&self, name: &str, delta: &UsageRecord) {
        let mut stats = lock(&self.inner.stats);
        stats.func_names.insert(name.to_string());
        stats
            .stat_by_name
            .entry(name.to_string())
            .or_default()
            .merge(delta);
    }

    /// Snapshot of one function's record
    ///
    /// Workers hold no aggregate, so they always read `None`.
    pub fn get(&self, name: &str) -> Option<UsageRecord> {
        if self.mode() == RegistryMode::Worker {
            return None;
        }
        lock(&self.inner.stats).stat_by_name.get(name).cloned()
    }

    /// Snapshot of all records
    pub fn all(&self) -> HashMap<String, UsageRecord> {
        if self.mode() == RegistryMode::Worker {
            return HashMap::new();
        }
        lock(&self.inner.stats).stat_by_name.clone()
    }

    /// Name to record mapping; same as [`Registry::all`]
    pub fn stat_by_name(&self) -> HashMap<String, UsageRecord> {
        self.all()
    }

    pub fn clear_stat(&self) {
        lock(&self.inner.stats).stat_by_name.clear();
    }

    /// Switch into multiprocess mode
    ///
    /// A process that inherited a coordinator address (see
    /// [`Registry::multiprocess_env`]) becomes a worker; any other process
    /// becomes the coordinator, listening on an ephemeral localhost port. A
    /// second call returns the role taken by the first.
    pub fn init_multiprocess_registry(&self) -> Result<MultiprocessRole> {
        match multiprocess::coordinator_from_env() {
            Some(addr) => self.init_worker(addr),
            None => self.init_coordinator(multiprocess::default_bind_addr()),
        }
    }

    /// Become the coordinator, listening on `bind`
    pub fn init_coordinator(&self, bind: SocketAddr) -> Result<MultiprocessRole> {
        let mut mode = lock(&self.inner.mode);
        if let Some(role) = current_role(&mode) {
            return Ok(role);
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let coordinator = Coordinator::start(bind, move |message| match weak.upgrade() {
            Some(inner) => {
                Registry { inner }.apply_message(message);
                true
            }
            None => false,
        })?;
        let addr = coordinator.addr();
        tracing::debug!(%addr, "registry coordinator listening");
        *mode = Mode::Coordinator(coordinator);
        Ok(MultiprocessRole::Coordinator(addr))
    }

    /// Become a worker pushing deltas to the coordinator at `addr`
    pub fn init_worker(&self, addr: SocketAddr) -> Result<MultiprocessRole> {
        let mut mode = lock(&self.inner.mode);
        if let Some(role) = current_role(&mode) {
            return Ok(role);
        }

        let interval = *lock(&self.inner.flush_interval);
        let contributor = Contributor::start(addr, interval)?;
        let known = std::mem::take(&mut lock(&self.inner.stats).stat_by_name);
        for name in lock(&self.inner.stats).func_names.iter() {
            contributor.register(name);
        }
        for (name, record) in &known {
            contributor.buffer_record(name, record);
        }
        tracing::debug!(%addr, "registry worker attached to coordinator");
        *mode = Mode::Worker(contributor);
        Ok(MultiprocessRole::Worker(addr))
    }

    /// Environment a coordinator passes to child processes so they can attach as workers
    pub fn multiprocess_env(&self) -> Option<Vec<(String, String)>> {
        match &*lock(&self.inner.mode) {
            Mode::Coordinator(coordinator) => Some(multiprocess::child_env(coordinator.addr())),
            _ => None,
        }
    }

    /// Push pending deltas now; a no-op outside worker mode
    pub fn flush(&self) -> Result<()> {
        match &*lock(&self.inner.mode) {
            Mode::Worker(contributor) => contributor.flush(),
            _ => Ok(()),
        }
    }

    /// Stop the listener or contributor and fall back to local mode. Mainly for tests.
    pub fn close_multiprocess_registry(&self) {
        let previous = std::mem::replace(&mut *lock(&self.inner.mode), Mode::Local);
        match previous {
            Mode::Coordinator(coordinator) => coordinator.stop(),
            Mode::Worker(contributor) => contributor.stop(),
            Mode::Local => {}
        }
    }

    fn apply_message(&self, message: Message) {
        match message {
            Message::Register { name } => {
                lock(&self.inner.stats).func_names.insert(name);
            }
            Message::Delta { name, record } => self.merge(&name, &record),
            Message::Stop => {}
        }
    }
}

fn current_role(mode: &Mode) -> Option<MultiprocessRole> {
    match mode {
        Mode::Local => None,
        Mode::Coordinator(coordinator) => Some(MultiprocessRole::Coordinator(coordinator.addr())),
        Mode::Worker(contributor) => Some(MultiprocessRole::Worker(contributor.target())),
    }
}

/// Times one wrapped call and records it exactly once
///
/// A guard dropped before it was finished records the call as failed with kind
/// `cancelled` (or `panic` while unwinding).
pub(crate) struct CallGuard {
    registry: Registry,
    name: Arc<str>,
    shape: ResultShape,
    started: Option<Instant>,
}

impl CallGuard {
    pub(crate) fn start(registry: Registry, name: Arc<str>, shape: ResultShape) -> Self {
        CallGuard {
            registry,
            name,
            shape,
            started: Some(Instant::now()),
        }
    }

    /// The body asked to skip execution: a success with no time and no rows
    pub(crate) fn cancelled(mut self) {
        self.finish(Duration::ZERO, 0, None);
    }

    pub(crate) fn success(mut self, tuples: u64) {
        let elapsed = self.elapsed();
        self.finish(elapsed, tuples, None);
    }

    pub(crate) fn failure(mut self, error: &SqlFnError) {
        let elapsed = self.elapsed();
        self.finish(elapsed, 0, Some(error.error_kind().to_string()));
    }

    fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    fn finish(&mut self, duration: Duration, tuples: u64, error: Option<String>) {
        if self.started.take().is_none() {
            return;
        }
        match &error {
            Some(kind) => tracing::warn!(
                func = %self.name,
                shape = %self.shape,
                error = %kind,
                elapsed_us = duration.as_micros() as u64,
                "sql function call failed"
            ),
            None => tracing::debug!(
                func = %self.name,
                shape = %self.shape,
                tuples,
                elapsed_us = duration.as_micros() as u64,
                "sql function call finished"
            ),
        }
        self.registry.record(FuncCallEvent {
            func_name: self.name.to_string(),
            duration: Some(duration),
            tuples,
            error,
        });
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.started.is_some() {
            let kind = if std::thread::panicking() {
                KIND_PANIC
            } else {
                KIND_CANCELLED
            };
            let elapsed = self.elapsed();
            self.finish(elapsed, 0, Some(kind.to_string()));
        }
    }
}
