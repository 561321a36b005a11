//! Pool of analysis engine processes.
//!
//! The pool owns one long-lived primary engine for interactive analysis and
//! any number of batch engines started on demand, never more than
//! [`MAX_ENGINES`] in total. Engines are lent out through [`EngineHandle`]
//! guards; dropping a guard checks the engine back in.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::engine::{EngineError, EngineProcess};

/// Hard ceiling on the number of engine processes one pool may own.
pub const MAX_ENGINES: usize = 8;

const PRIMARY_LABEL: &str = "primary";

/// Errors raised while starting or lending engines.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The engine configuration is unusable; no process was spawned.
    #[error("Invalid engine configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// The primary engine could not be started.
    #[error("Primary engine unavailable: {0}")]
    PrimaryUnavailable(EngineError),
    /// Every engine is busy or none could be started.
    #[error("No idle analysis engine available")]
    NoIdleEngines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Primary,
    Batch,
}

struct PoolEntry {
    key: u64,
    role: Role,
    engine: Arc<EngineProcess>,
    busy: bool,
    /// Stop the engine when it is next checked in.
    retiring: bool,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    next_key: u64,
    next_batch_label: usize,
}

impl PoolState {
    fn insert(&mut self, role: Role, engine: EngineProcess) {
        self.next_key += 1;
        self.entries.push(PoolEntry {
            key: self.next_key,
            role,
            engine: Arc::new(engine),
            busy: false,
            retiring: false,
        });
    }

    fn primary(&self) -> Option<&PoolEntry> {
        self.entries.iter().find(|e| e.role == Role::Primary)
    }

    /// Batch engines that can still be lent out once idle.
    fn batch_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.role == Role::Batch && !e.retiring)
            .count()
    }

    /// Removes idle entries whose process has exited and returns them.
    fn take_dead_idle(&mut self) -> Vec<PoolEntry> {
        let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| !e.busy && !e.engine.is_alive());
        self.entries = live;
        dead
    }
}

struct PoolShared {
    max_engines: usize,
    state: Mutex<PoolState>,
    /// Serializes engine startup and shutdown so the ceiling holds.
    startup: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PoolShared {
    fn checkout_where(self: &Arc<Self>, wanted: impl Fn(&PoolEntry) -> bool) -> Option<EngineHandle> {
        let mut state = lock(&self.state);
        let entry = state
            .entries
            .iter_mut()
            .find(|e| !e.busy && !e.retiring && wanted(e))?;
        entry.busy = true;
        Some(EngineHandle {
            key: entry.key,
            role: entry.role,
            engine: Arc::clone(&entry.engine),
            pool: Arc::clone(self),
        })
    }

    fn checkin(&self, key: u64) {
        let finished = {
            let mut state = lock(&self.state);
            let Some(pos) = state.entries.iter().position(|e| e.key == key) else {
                // Already taken by shutdown_all.
                return;
            };
            let entry = &mut state.entries[pos];
            entry.busy = false;
            if !entry.engine.is_alive() {
                warn!(engine = entry.engine.label(), "removing dead engine from pool");
                Some(state.entries.remove(pos))
            } else if entry.retiring {
                Some(state.entries.remove(pos))
            } else {
                None
            }
        };
        if let Some(entry) = finished {
            entry.engine.stop();
        }
    }
}

/// Exclusive access to one pooled engine.
///
/// Checked back in exactly once, when dropped.
pub struct EngineHandle {
    key: u64,
    role: Role,
    engine: Arc<EngineProcess>,
    pool: Arc<PoolShared>,
}

impl EngineHandle {
    /// Returns true if this handle lends out the primary engine.
    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }
}

impl Deref for EngineHandle {
    type Target = EngineProcess;

    fn deref(&self) -> &EngineProcess {
        &self.engine
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.pool.checkin(self.key);
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("engine", &self.engine.label())
            .field("pid", &self.engine.pid())
            .finish()
    }
}

/// Owner of every engine process in an analysis session.
pub struct EnginePool {
    shared: Arc<PoolShared>,
}

impl Default for EnginePool {
    fn default() -> Self {
        Self::new(MAX_ENGINES)
    }
}

impl EnginePool {
    /// Creates an empty pool holding at most `max_engines` processes,
    /// clamped to `1..=MAX_ENGINES`.
    pub fn new(max_engines: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                max_engines: max_engines.clamp(1, MAX_ENGINES),
                state: Mutex::new(PoolState::default()),
                startup: Mutex::new(()),
            }),
        }
    }

    /// Maximum number of processes this pool will own.
    pub fn max_engines(&self) -> usize {
        self.shared.max_engines
    }

    /// Starts the primary engine unless a live one already exists.
    ///
    /// # Errors
    ///
    /// [`PoolError::Configuration`] if `config` fails validation, or
    /// [`PoolError::PrimaryUnavailable`] if the process fails to start.
    pub fn ensure_primary(&self, config: &EngineConfig) -> Result<(), PoolError> {
        let _startup = lock(&self.shared.startup);
        self.reap_dead();
        if lock(&self.shared.state).primary().is_some() {
            return Ok(());
        }
        config.validate()?;

        let engine =
            EngineProcess::start(config, PRIMARY_LABEL).map_err(PoolError::PrimaryUnavailable)?;
        lock(&self.shared.state).insert(Role::Primary, engine);
        Ok(())
    }

    /// Gathers up to `desired` engines for a batch and checks them all out.
    ///
    /// The primary counts as one of the `desired` engines; up to
    /// `desired - 1` batch engines are started alongside it. Engines that fail
    /// to start are logged and left out, so the batch may get fewer handles
    /// than asked for.
    ///
    /// # Errors
    ///
    /// [`PoolError::Configuration`] if `config` fails validation (reported
    /// once, before anything is spawned), or [`PoolError::NoIdleEngines`] if
    /// `desired > 0` and no engine could be lent out.
    pub fn acquire_batch(
        &self,
        config: &EngineConfig,
        desired: usize,
    ) -> Result<Vec<EngineHandle>, PoolError> {
        if desired == 0 {
            return Ok(Vec::new());
        }
        config.validate()?;
        let desired = desired.min(self.shared.max_engines);

        match self.ensure_primary(config) {
            Ok(()) => {}
            Err(PoolError::PrimaryUnavailable(e)) => {
                warn!(error = %e, "primary engine failed to start, continuing with batch engines");
            }
            Err(e) => return Err(e),
        }

        {
            let _startup = lock(&self.shared.startup);
            let labels: Vec<String> = {
                let mut state = lock(&self.shared.state);
                // Retiring engines still hold a process until checked in.
                let room = self.shared.max_engines.saturating_sub(state.entries.len());
                let missing = (desired - 1).saturating_sub(state.batch_count()).min(room);
                (0..missing)
                    .map(|_| {
                        state.next_batch_label += 1;
                        format!("engine-{}", state.next_batch_label)
                    })
                    .collect()
            };

            for (label, started) in labels.iter().zip(start_all(config, &labels)) {
                match started {
                    Ok(engine) => lock(&self.shared.state).insert(Role::Batch, engine),
                    Err(e) => warn!(engine = %label, error = %e, "batch engine failed to start"),
                }
            }
        }

        let mut handles = Vec::with_capacity(desired);
        while handles.len() < desired {
            match self.checkout() {
                Some(handle) => handles.push(handle),
                None => break,
            }
        }
        if handles.is_empty() {
            return Err(PoolError::NoIdleEngines);
        }
        info!(engines = handles.len(), desired, "engines acquired for batch");
        Ok(handles)
    }

    /// Lends out any idle engine, or `None` if all are busy.
    pub fn checkout(&self) -> Option<EngineHandle> {
        self.shared.checkout_where(|_| true)
    }

    /// Lends out the primary engine, or `None` if it is busy or missing.
    pub fn checkout_primary(&self) -> Option<EngineHandle> {
        self.shared.checkout_where(|e| e.role == Role::Primary)
    }

    /// Returns a handle to the pool. Equivalent to dropping it.
    pub fn checkin(&self, handle: EngineHandle) {
        drop(handle);
    }

    /// Retires every batch engine, keeping the primary.
    ///
    /// Idle batch engines are stopped now; busy ones when checked in.
    pub fn release_batch(&self) {
        let idle: Vec<PoolEntry> = {
            let mut state = lock(&self.shared.state);
            let (idle, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.entries)
                .into_iter()
                .partition(|e| e.role == Role::Batch && !e.busy);
            state.entries = keep;
            for entry in state.entries.iter_mut().filter(|e| e.role == Role::Batch) {
                entry.retiring = true;
            }
            idle
        };
        stop_all(&idle);
    }

    /// Stops every engine, the primary included, busy or not.
    ///
    /// Engines that already exited are reaped. When this returns no process
    /// started by the pool is still running; handles still out fail their
    /// next query with `EngineCrashed`.
    pub fn shutdown_all(&self) {
        let _startup = lock(&self.shared.startup);
        let entries = std::mem::take(&mut lock(&self.shared.state).entries);
        if entries.is_empty() {
            return;
        }
        info!(engines = entries.len(), "shutting down analysis engines");
        stop_all(&entries);
    }

    /// Number of engine processes currently owned.
    pub fn engine_count(&self) -> usize {
        lock(&self.shared.state).entries.len()
    }

    /// Number of engines available for checkout.
    pub fn idle_count(&self) -> usize {
        lock(&self.shared.state)
            .entries
            .iter()
            .filter(|e| !e.busy && !e.retiring)
            .count()
    }

    /// Process ids of every owned engine.
    pub fn process_ids(&self) -> Vec<u32> {
        lock(&self.shared.state)
            .entries
            .iter()
            .map(|e| e.engine.pid())
            .collect()
    }

    fn reap_dead(&self) {
        let dead = lock(&self.shared.state).take_dead_idle();
        for entry in &dead {
            warn!(engine = entry.engine.label(), "removing dead engine from pool");
        }
        stop_all(&dead);
    }
}

impl Drop for EnginePool {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// Starts one engine per label in parallel, results in label order.
fn start_all(config: &EngineConfig, labels: &[String]) -> Vec<Result<EngineProcess, EngineError>> {
    thread::scope(|scope| {
        let starts: Vec<_> = labels
            .iter()
            .map(|label| scope.spawn(move || EngineProcess::start(config, label.as_str())))
            .collect();
        starts
            .into_iter()
            .map(|start| {
                start.join().unwrap_or_else(|_| {
                    Err(EngineError::ProcessStartFailure {
                        executable: config.executable.display().to_string(),
                        reason: "startup thread panicked".to_string(),
                    })
                })
            })
            .collect()
    })
}

fn stop_all(entries: &[PoolEntry]) {
    thread::scope(|scope| {
        for entry in entries {
            scope.spawn(move || entry.engine.stop());
        }
    });
}
