//! Atomics shared between the processing loop and the supervisor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last time the processing loop made progress.
///
/// Stored as milliseconds since a fixed origin so it fits in an atomic.
/// Only the processing loop writes it; the watchdog reads it.
#[derive(Debug)]
pub struct Liveness {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Liveness {
    /// Create a liveness marker that counts as touched at `origin`.
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record progress at `now`. Never moves backwards.
    pub fn touch(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.origin).as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::SeqCst);
    }

    pub fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::SeqCst))
    }

    /// Time since the last recorded progress.
    pub fn stalled_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last())
    }
}

/// Number of restarts over the process lifetime. Never reset.
#[derive(Debug, Default)]
pub struct RestartCounter(AtomicU64);

impl RestartCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one restart and return the new total.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
