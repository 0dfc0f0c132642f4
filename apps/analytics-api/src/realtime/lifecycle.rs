//! One-shot bootstrap and shutdown for the realtime subsystem.
//!
//! State only moves forward: `Uninitialized -> Running -> ShuttingDown`.
//! `init` may be called from any number of entry points; only the first call
//! starts the sweeps.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::bridge::IngestionBridge;
use super::registry::ConnectionRegistry;
use super::scheduler::{LifecycleScheduler, SchedulerConfig};

const UNINITIALIZED: u8 = 0;
const RUNNING: u8 = 1;
const SHUTTING_DOWN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    ShuttingDown,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            UNINITIALIZED => Self::Uninitialized,
            RUNNING => Self::Running,
            _ => Self::ShuttingDown,
        }
    }
}

/// Owns the registry and the sweeps for the lifetime of the process.
///
/// Constructed once at startup and shared through `AppState`.
pub struct Realtime {
    registry: Arc<ConnectionRegistry>,
    bridge: IngestionBridge,
    schedule: SchedulerConfig,
    state: AtomicU8,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
}

impl Realtime {
    pub fn new(schedule: SchedulerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            bridge: IngestionBridge::new(registry.clone()),
            registry,
            schedule,
            state: AtomicU8::new(UNINITIALIZED),
            sweeps: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &IngestionBridge {
        &self.bridge
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start the periodic sweeps if nobody has yet. Returns `true` only for
    /// the call that actually started them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(&self) -> bool {
        if self
            .state
            .compare_exchange(UNINITIALIZED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        tracing::info!("initializing realtime events");
        let handles = LifecycleScheduler::new(self.registry.clone(), self.schedule.clone()).start();
        self.sweeps.lock().extend(handles);
        tracing::info!("realtime events initialized");
        true
    }

    /// Send a shutdown notice to every subscriber and clear the registry.
    ///
    /// The sweeps keep ticking over the empty registry until the process exits.
    pub fn shutdown(&self) {
        let previous = self.state.swap(SHUTTING_DOWN, Ordering::AcqRel);
        if previous == SHUTTING_DOWN {
            return;
        }

        tracing::info!("shutting down realtime events");
        let cleared = self.registry.shutdown();
        tracing::info!(cleared, "realtime events shutdown complete");
    }

    pub fn is_accepting(&self) -> bool {
        self.state() != LifecycleState::ShuttingDown
    }

    /// Number of sweep tasks this instance has started.
    pub fn sweep_count(&self) -> usize {
        self.sweeps.lock().len()
    }
}
