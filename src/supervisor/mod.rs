//! Self-supervision: liveness tracking, the stall watchdog and restarts.
//!
//! Every schedule runs on its own thread driven by a [`Timer`], so tests can
//! swap in [`ManualTimer`] and fire ticks by hand.

pub mod liveness;
pub mod restart;
pub mod timer;
pub mod watchdog;

pub use liveness::{Liveness, RestartCounter};
pub use restart::{RestartPolicy, RestartReason, RestartScheduler, Restartable};
pub use timer::{CrossbeamTimer, ManualTimer, TaskHandle, Timer, spawn_periodic};
pub use watchdog::{WatchdogConfig, spawn_watchdog};

use std::thread::{self, JoinHandle};

/// Join a worker thread, reporting panics.
///
/// A thread cannot join itself; when called from `handle`'s own thread the
/// handle is dropped instead, which detaches it.
pub(crate) fn join_thread(handle: JoinHandle<()>, name: &str) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if let Err(panic_info) = handle.join() {
        let msg = panic_info
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic");
        tracing::error!(thread = name, panic = msg, "worker thread panicked");
    }
}
