//! Deferred, coalesced pipeline rebuilds with backoff.

use super::liveness::RestartCounter;
use super::timer::Timer;
use crate::clock::Clock;
use crate::defaults;
use crate::error::Result;
use crate::events::EventSink;
use crossbeam_channel::{Receiver, Sender, select};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// When and how often to rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay before the first rebuild of a failure streak.
    pub base_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
    /// Consecutive failure restarts allowed before giving up. `None` never
    /// gives up.
    pub max_restarts: Option<u64>,
    /// A pipeline that ran this long since the last restart ends the streak.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(defaults::RESTART_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RESTART_MAX_DELAY_MS),
            max_restarts: None,
            stable_after: Duration::from_millis(defaults::WATCHDOG_STALL_MS),
        }
    }
}

impl RestartPolicy {
    /// Delay for the restart that follows `streak` earlier failures.
    pub fn delay_for(&self, streak: u64) -> Duration {
        let factor = 1u32.checked_shl(streak.min(31) as u32).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Why a rebuild was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The watchdog saw no progress for a full stall window.
    Stall,
    /// The processing loop or the pipeline start hit a fatal error.
    Fatal,
    /// The previous rebuild itself failed.
    RebuildFailed,
    /// The periodic unconditional restart.
    Scheduled,
}

impl RestartReason {
    /// Whether this restart counts toward the failure streak.
    pub fn is_failure(self) -> bool {
        !matches!(self, RestartReason::Scheduled)
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestartReason::Stall => "stall",
            RestartReason::Fatal => "fatal error",
            RestartReason::RebuildFailed => "rebuild failed",
            RestartReason::Scheduled => "scheduled",
        };
        f.write_str(name)
    }
}

/// Something the scheduler can tear down and rebuild.
pub trait Restartable: Send + Sync {
    /// False once the host stopped; requests are then dropped.
    fn is_active(&self) -> bool;

    /// Tear everything down and build a fresh pipeline.
    fn restart(&self) -> Result<()>;

    /// Stop for good after the restart budget ran out.
    fn halt(&self, reason: &str);
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: bool,
    generation: u64,
    streak: u64,
    last_restart: Option<Instant>,
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    policy: RestartPolicy,
    counter: Arc<RestartCounter>,
    timer: Arc<dyn Timer>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    target: Weak<dyn Restartable>,
    state: Mutex<SchedulerState>,
}

/// Schedules at most one deferred rebuild at a time.
///
/// Requests made while a rebuild is pending are coalesced into it and not
/// counted. The target is held weakly so the scheduler can live inside it.
#[derive(Clone)]
pub struct RestartScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for RestartScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartScheduler")
            .field("policy", &self.inner.policy)
            .field("restarts", &self.inner.counter.get())
            .finish_non_exhaustive()
    }
}

impl RestartScheduler {
    pub fn new(
        policy: RestartPolicy,
        counter: Arc<RestartCounter>,
        timer: Arc<dyn Timer>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        target: Weak<dyn Restartable>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                policy,
                counter,
                timer,
                clock,
                sink,
                target,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Ask for a rebuild.
    ///
    /// Returns true when a new rebuild was scheduled, false when the request
    /// was coalesced, the target is inactive, or the budget ran out.
    pub fn request(&self, reason: RestartReason) -> bool {
        self.inner.request(reason)
    }

    /// Drop any pending rebuild and wait for a running one to finish.
    pub fn cancel(&self) {
        let worker = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.pending = false;
            state.cancel = None;
            state.worker.take()
        };
        if let Some(handle) = worker {
            super::join_thread(handle, "wakeguard-restart");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending
    }

    /// Consecutive failure restarts in the current streak.
    pub fn streak(&self) -> u64 {
        self.inner.lock().streak
    }

    pub fn restart_count(&self) -> u64 {
        self.inner.counter.get()
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.inner.policy
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request(self: &Arc<Self>, reason: RestartReason) -> bool {
        let Some(target) = self.target.upgrade() else {
            return false;
        };
        if !target.is_active() {
            tracing::debug!(%reason, "restart request ignored, monitor stopped");
            return false;
        }

        let now = self.clock.now();
        let mut state = self.lock();
        // stop() clears the flag before it cancels under this lock.
        if !target.is_active() {
            tracing::debug!(%reason, "restart request ignored, monitor stopping");
            return false;
        }
        if state.pending {
            tracing::debug!(%reason, "restart already pending, request coalesced");
            return false;
        }

        if let Some(last) = state.last_restart
            && now.saturating_duration_since(last) >= self.policy.stable_after
        {
            state.streak = 0;
        }

        if reason.is_failure()
            && let Some(max) = self.policy.max_restarts
            && state.streak >= max
        {
            drop(state);
            let message = format!("Giving up after {max} consecutive restarts");
            tracing::error!(%reason, max_restarts = max, "restart budget exhausted");
            self.sink.error(&message);
            target.halt(&message);
            return false;
        }

        let delay = if reason.is_failure() {
            self.policy.delay_for(state.streak)
        } else {
            self.policy.base_delay
        };

        state.generation += 1;
        let generation = state.generation;
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let fire = self.timer.after(delay);
        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("wakeguard-restart".to_string())
            .spawn(move || inner.run_deferred(generation, fire, cancel_rx));

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                drop(state);
                tracing::error!(error = %e, "failed to spawn restart thread");
                self.sink.error(&format!("Failed to schedule restart: {e}"));
                return false;
            }
        };

        if reason.is_failure() {
            state.streak += 1;
        }
        state.pending = true;
        state.last_restart = Some(now);
        state.cancel = Some(cancel_tx);
        // A replaced worker has finished or is the caller itself.
        state.worker = Some(worker);
        drop(state);

        let attempt = self.counter.increment();
        tracing::warn!(
            %reason,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "pipeline restart scheduled"
        );
        true
    }

    fn run_deferred(self: &Arc<Self>, generation: u64, fire: Receiver<Instant>, cancel: Receiver<()>) {
        select! {
            recv(fire) -> _ => {}
            recv(cancel) -> _ => {
                tracing::debug!("pending restart cancelled");
                return;
            }
        }

        {
            let mut state = self.lock();
            if state.generation != generation || !state.pending {
                return;
            }
            // A pipeline that dies during the rebuild must be able to ask again.
            state.pending = false;
            state.cancel = None;
        }

        let Some(target) = self.target.upgrade() else {
            return;
        };
        if !target.is_active() {
            return;
        }

        match target.restart() {
            Ok(()) => tracing::info!(restarts = self.counter.get(), "pipeline rebuilt"),
            Err(e) => {
                tracing::error!(error = %e, "pipeline rebuild failed");
                self.sink.error(&format!("Restart failed: {e}"));
                self.request(RestartReason::RebuildFailed);
            }
        }
    }
}
