//! Periodic and one-shot timers as channels.

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, select};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Source of timer channels.
pub trait Timer: Send + Sync {
    /// Channel that receives an instant every `period`.
    fn every(&self, period: Duration) -> Receiver<Instant>;

    /// Channel that receives a single instant after `delay`.
    fn after(&self, delay: Duration) -> Receiver<Instant>;
}

/// Real timers backed by `crossbeam_channel::tick` and `after`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossbeamTimer;

impl Timer for CrossbeamTimer {
    fn every(&self, period: Duration) -> Receiver<Instant> {
        crossbeam_channel::tick(period)
    }

    fn after(&self, delay: Duration) -> Receiver<Instant> {
        crossbeam_channel::after(delay)
    }
}

#[derive(Debug)]
struct Registration {
    period: Duration,
    repeating: bool,
    sender: Sender<Instant>,
}

/// Timer that only fires when told to.
///
/// Clones share their registrations, so a test keeps one handle and fires
/// the channels handed out through another.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    registrations: Arc<Mutex<Vec<Registration>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every live periodic timer with the given period.
    ///
    /// Returns how many receivers got the tick.
    pub fn tick(&self, period: Duration) -> usize {
        let mut registrations = self.lock();
        let now = Instant::now();
        let mut delivered = 0;
        registrations.retain(|r| {
            if !r.repeating || r.period != period {
                return true;
            }
            if r.sender.send(now).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });
        delivered
    }

    /// Fire and discard every pending one-shot timer.
    pub fn fire_delayed(&self) -> usize {
        let mut registrations = self.lock();
        let now = Instant::now();
        let mut delivered = 0;
        registrations.retain(|r| {
            if r.repeating {
                return true;
            }
            if r.sender.send(now).is_ok() {
                delivered += 1;
            }
            false
        });
        delivered
    }

    /// One-shot timers not yet fired.
    pub fn pending_delays(&self) -> usize {
        self.lock().iter().filter(|r| !r.repeating).count()
    }

    /// Delays requested so far and not yet fired, in registration order.
    pub fn pending_delay_values(&self) -> Vec<Duration> {
        self.lock()
            .iter()
            .filter(|r| !r.repeating)
            .map(|r| r.period)
            .collect()
    }

    /// Periodic timers registered with `period`, including ones whose
    /// receiver is already gone but has not been ticked since.
    pub fn periodic_count(&self, period: Duration) -> usize {
        self.lock()
            .iter()
            .filter(|r| r.repeating && r.period == period)
            .count()
    }

    fn register(&self, period: Duration, repeating: bool) -> Receiver<Instant> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.lock().push(Registration {
            period,
            repeating,
            sender,
        });
        receiver
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Timer for ManualTimer {
    fn every(&self, period: Duration) -> Receiver<Instant> {
        self.register(period, true)
    }

    fn after(&self, delay: Duration) -> Receiver<Instant> {
        self.register(delay, false)
    }
}

/// A cancellable background schedule.
///
/// Stopping drops the cancel sender, which wakes the thread, then joins it.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn stop(&mut self) {
        self.cancel = None;
        if let Some(handle) = self.thread.take() {
            super::join_thread(handle, self.name);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `on_tick` every `period` on a named thread until it breaks or the
/// handle is stopped.
///
/// The timer channel is created before this returns, so a tick fired right
/// after the call is not lost.
pub fn spawn_periodic<F>(
    timer: &dyn Timer,
    period: Duration,
    name: &'static str,
    mut on_tick: F,
) -> Result<TaskHandle>
where
    F: FnMut(Instant) -> ControlFlow<()> + Send + 'static,
{
    let ticks = timer.every(period);
    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            loop {
                select! {
                    recv(ticks) -> tick => {
                        let Ok(at) = tick else { break };
                        if on_tick(at).is_break() {
                            break;
                        }
                    }
                    recv(cancel_rx) -> _ => break,
                }
            }
            tracing::trace!(task = name, "periodic task finished");
        })?;

    Ok(TaskHandle {
        name,
        cancel: Some(cancel_tx),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_manual_timer_ticks_matching_period_only() {
        let timer = ManualTimer::new();
        let fast = timer.every(Duration::from_secs(1));
        let slow = timer.every(Duration::from_secs(10));

        assert_eq!(timer.tick(Duration::from_secs(1)), 1);
        assert!(fast.try_recv().is_ok());
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn test_manual_timer_fires_delays_once() {
        let timer = ManualTimer::new();
        let delayed = timer.after(Duration::from_millis(1500));

        assert_eq!(timer.pending_delays(), 1);
        assert_eq!(
            timer.pending_delay_values(),
            vec![Duration::from_millis(1500)]
        );
        assert_eq!(timer.fire_delayed(), 1);
        assert!(delayed.try_recv().is_ok());
        assert_eq!(timer.pending_delays(), 0);
        assert_eq!(timer.fire_delayed(), 0);
    }

    #[test]
    fn test_manual_timer_drops_dead_receivers() {
        let timer = ManualTimer::new();
        drop(timer.every(Duration::from_secs(1)));

        assert_eq!(timer.periodic_count(Duration::from_secs(1)), 1);
        assert_eq!(timer.tick(Duration::from_secs(1)), 0);
        assert_eq!(timer.periodic_count(Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_crossbeam_timer_after_fires() {
        let rx = CrossbeamTimer.after(Duration::from_millis(10));
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_spawn_periodic_runs_until_break() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut handle = spawn_periodic(&timer, Duration::from_secs(1), "counter", move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

        timer.tick(Duration::from_secs(1));
        assert!(wait_for(|| count.load(Ordering::SeqCst) == 1));
        timer.tick(Duration::from_secs(1));
        assert!(wait_for(|| handle.is_finished()));

        handle.stop();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_cancels_idle_task() {
        let timer = ManualTimer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut handle = spawn_periodic(&timer, Duration::from_secs(1), "idle", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();

        handle.stop();
        assert!(handle.is_finished());
        assert_eq!(timer.tick(Duration::from_secs(1)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
