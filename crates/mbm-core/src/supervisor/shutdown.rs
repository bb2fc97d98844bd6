//! Process-wide registry of supervised children, drained on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use super::handle::ProcessHandle;

/// Exit status used for every signal-driven shutdown.
pub const SHUTDOWN_EXIT_CODE: i32 = 1;

/// Tracks every launched process so a signal handler can stop them all.
///
/// Owned by the entry point; clones share the same registry.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    processes: Arc<Mutex<Vec<(String, ProcessHandle)>>>,
    shutting_down: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, ProcessHandle)>> {
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `handle` under `name`, replacing an earlier entry with the same name.
    pub fn register(&self, name: impl Into<String>, handle: ProcessHandle) {
        let name = name.into();
        let mut processes = self.lock();
        match processes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = handle,
            None => processes.push((name, handle)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Set once `shutdown_all` has started; processes exiting after that
    /// were stopped on purpose.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Terminates every registered process in registration order.
    ///
    /// Returns how many processes were visited. Calling it again is harmless
    /// since termination is idempotent.
    pub fn shutdown_all(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);
        let processes: Vec<(String, ProcessHandle)> = self.lock().clone();
        warn!("Cleanup underlying processes ...");
        for (name, handle) in &processes {
            info!(pid = handle.pid(), "terminating {}", name);
            handle.terminate();
        }
        processes.len()
    }
}
