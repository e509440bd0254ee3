//! Stall detection for the processing loop.

use super::liveness::Liveness;
use super::timer::{TaskHandle, Timer, spawn_periodic};
use crate::clock::Clock;
use crate::defaults;
use crate::error::Result;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

/// How often the watchdog looks and how long a stall may last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub stall: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(defaults::WATCHDOG_INTERVAL_MS),
            stall: Duration::from_millis(defaults::WATCHDOG_STALL_MS),
        }
    }
}

/// Start a watchdog over `liveness`.
///
/// On every tick the time since the last progress is compared with
/// `config.stall`. The first time it reaches the limit `on_stall` runs with
/// the measured stall and the watchdog stops itself; the restart that
/// follows creates a fresh one.
pub fn spawn_watchdog<F>(
    config: WatchdogConfig,
    liveness: Arc<Liveness>,
    clock: Arc<dyn Clock>,
    timer: &dyn Timer,
    on_stall: F,
) -> Result<TaskHandle>
where
    F: FnOnce(Duration) + Send + 'static,
{
    let mut on_stall = Some(on_stall);
    spawn_periodic(timer, config.interval, "wakeguard-watchdog", move |_| {
        let stalled = liveness.stalled_for(clock.now());
        tracing::trace!(stalled_ms = stalled.as_millis() as u64, "watchdog tick");
        if stalled < config.stall {
            return ControlFlow::Continue(());
        }
        tracing::warn!(
            stalled_ms = stalled.as_millis() as u64,
            limit_ms = config.stall.as_millis() as u64,
            "processing loop stalled"
        );
        if let Some(callback) = on_stall.take() {
            callback(stalled);
        }
        ControlFlow::Break(())
    })
}
