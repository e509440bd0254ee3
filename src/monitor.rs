//! The host-facing monitor: owns the pipeline and keeps it alive.
//!
//! [`Monitor::start`] builds one pipeline instance (audio source, VAD,
//! keyword state machine, recognition engine) plus its watchdog. Every
//! restart tears the whole instance down and builds a new one through the
//! [`Backend`]; only the restart counter and the event sink survive.

use crate::audio::vad::{ActivityLevelDetector, VadConfig};
use crate::backend::Backend;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::events::EventSink;
use crate::keyword::{KeywordStateMachine, MachineConfig};
use crate::pipeline::{ControlCommand, FatalHandler, Pipeline, PipelineHandle, ProcessorConfig};
use crate::supervisor::{
    CrossbeamTimer, Liveness, RestartCounter, RestartPolicy, RestartReason, RestartScheduler,
    Restartable, TaskHandle, Timer, WatchdogConfig, spawn_periodic, spawn_watchdog,
};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Runtime settings for a [`Monitor`], with durations resolved.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub keyword: String,
    pub frame_size: usize,
    pub speech_threshold: f32,
    pub silence_threshold: Duration,
    pub watchdog: WatchdogConfig,
    pub restart: RestartPolicy,
    /// Period of the unconditional restart. `None` disables it.
    pub scheduled_restart: Option<Duration>,
    pub underrun_poll: Duration,
    /// How long a teardown waits for the processing loop to exit.
    pub teardown_timeout: Duration,
}

impl From<&Config> for MonitorConfig {
    fn from(config: &Config) -> Self {
        let stall = Duration::from_millis(config.watchdog.stall_ms);
        Self {
            keyword: config.keyword.phrase.clone(),
            frame_size: config.audio.frame_size,
            speech_threshold: config.vad.speech_threshold,
            silence_threshold: Duration::from_millis(config.transcription.silence_threshold_ms),
            watchdog: WatchdogConfig {
                interval: Duration::from_millis(config.watchdog.interval_ms),
                stall,
            },
            restart: RestartPolicy {
                base_delay: Duration::from_millis(config.restart.delay_ms),
                max_delay: Duration::from_millis(config.restart.max_delay_ms),
                max_restarts: config.restart.max_restarts,
                stable_after: stall,
            },
            scheduled_restart: (config.restart.scheduled_interval_ms > 0)
                .then(|| Duration::from_millis(config.restart.scheduled_interval_ms)),
            underrun_poll: Duration::from_millis(defaults::UNDERRUN_POLL_MS),
            teardown_timeout: Duration::from_millis(defaults::TEARDOWN_TIMEOUT_MS),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Snapshot for hosts that render status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub restarts: u64,
    /// Time since the processing loop last made progress, when a pipeline
    /// exists.
    pub last_activity_ms_ago: Option<u64>,
}

#[derive(Default)]
struct Parts {
    pipeline: Option<PipelineHandle>,
    watchdog: Option<TaskHandle>,
    scheduled: Option<TaskHandle>,
    liveness: Option<Arc<Liveness>>,
}

struct MonitorShared {
    config: MonitorConfig,
    backend: Arc<dyn Backend>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    timer: Arc<dyn Timer>,
    counter: Arc<RestartCounter>,
    running: AtomicBool,
    parts: Mutex<Parts>,
    scheduler: RestartScheduler,
    weak_self: Weak<MonitorShared>,
}

/// Always-on wake phrase monitor.
///
/// `start` and `stop` are idempotent. Dropping the monitor stops it.
pub struct Monitor {
    shared: Arc<MonitorShared>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, backend: Arc<dyn Backend>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_runtime(
            config,
            backend,
            sink,
            Arc::new(SystemClock),
            Arc::new(CrossbeamTimer),
        )
    }

    /// Build a monitor on an explicit clock and timer (for deterministic testing).
    pub fn with_runtime(
        config: MonitorConfig,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        timer: Arc<dyn Timer>,
    ) -> Self {
        let counter = Arc::new(RestartCounter::new());
        let shared = Arc::new_cyclic(|weak: &Weak<MonitorShared>| {
            let target: Weak<dyn Restartable> = weak.clone();
            let scheduler = RestartScheduler::new(
                config.restart,
                counter.clone(),
                timer.clone(),
                clock.clone(),
                sink.clone(),
                target,
            );
            MonitorShared {
                config,
                backend,
                sink,
                clock,
                timer,
                counter,
                running: AtomicBool::new(false),
                parts: Mutex::new(Parts::default()),
                scheduler,
                weak_self: weak.clone(),
            }
        });
        Self { shared }
    }

    /// Start monitoring. Returns false when already running.
    ///
    /// A pipeline that fails to build is reported through the sink and
    /// retried through the restart scheduler; the monitor counts as running
    /// either way.
    pub fn start(&self) -> bool {
        let shared = &self.shared;
        if shared.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(
            keyword = %shared.config.keyword,
            backend = shared.backend.name(),
            "monitor starting"
        );

        shared.start_scheduled_restarts();
        if let Err(e) = shared.build() {
            tracing::error!(error = %e, "failed to start pipeline");
            shared.sink.error(&format!("Failed to start: {e}"));
            shared.scheduler.request(RestartReason::Fatal);
        }
        true
    }

    /// Stop monitoring and cancel pending restarts. Returns false when
    /// already stopped.
    pub fn stop(&self) -> bool {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(restarts = shared.counter.get(), "monitor stopping");
        shared.scheduler.cancel();
        shared.teardown_all();
        true
    }

    /// Abandon the current capture and listen for the wake phrase again.
    ///
    /// Returns false when no pipeline is running.
    pub fn reset_keyword_state(&self) -> bool {
        self.shared
            .lock_parts()
            .pipeline
            .as_ref()
            .is_some_and(|p| p.send(ControlCommand::ResetKeywordState))
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Restarts over the lifetime of this monitor.
    pub fn restart_count(&self) -> u64 {
        self.shared.counter.get()
    }

    /// Whether a rebuild is scheduled but has not run yet.
    pub fn restart_pending(&self) -> bool {
        self.shared.scheduler.is_pending()
    }

    /// Frames processed by the current pipeline instance.
    pub fn frames_processed(&self) -> Option<u64> {
        self.shared
            .lock_parts()
            .pipeline
            .as_ref()
            .map(PipelineHandle::frames_processed)
    }

    pub fn status(&self) -> MonitorStatus {
        let now = self.shared.clock.now();
        let last_activity_ms_ago = self
            .shared
            .lock_parts()
            .liveness
            .as_ref()
            .map(|l| l.stalled_for(now).as_millis() as u64);
        MonitorStatus {
            running: self.is_running(),
            restarts: self.restart_count(),
            last_activity_ms_ago,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorShared {
    fn lock_parts(&self) -> MutexGuard<'_, Parts> {
        self.parts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_scheduled_restarts(&self) {
        let Some(period) = self.config.scheduled_restart else {
            return;
        };
        let weak = self.weak_self.clone();
        let spawned = spawn_periodic(
            self.timer.as_ref(),
            period,
            "wakeguard-scheduled-restart",
            move |_| {
                let Some(shared) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                if !shared.is_active() {
                    return ControlFlow::Break(());
                }
                tracing::info!(period_ms = period.as_millis() as u64, "scheduled restart");
                shared.scheduler.request(RestartReason::Scheduled);
                ControlFlow::Continue(())
            },
        );
        match spawned {
            Ok(handle) => self.lock_parts().scheduled = Some(handle),
            Err(e) => tracing::warn!(error = %e, "scheduled restarts unavailable"),
        }
    }

    /// Build one pipeline instance and its watchdog.
    fn build(&self) -> Result<()> {
        let liveness = Arc::new(Liveness::new(self.clock.now()));
        let source = self.backend.audio_source()?;
        let engine = self.backend.recognition_engine()?;
        tracing::debug!(engine = engine.name(), source = source.name(), "building pipeline");

        let machine = KeywordStateMachine::new(
            MachineConfig {
                keyword: self.config.keyword.clone(),
                silence_threshold: self.config.silence_threshold,
            },
            engine,
            self.sink.clone(),
        );
        let vad = Box::new(ActivityLevelDetector::new(VadConfig {
            speech_threshold: self.config.speech_threshold,
        }));

        let weak = self.weak_self.clone();
        let on_fatal: FatalHandler = Box::new(move |message| {
            if let Some(shared) = weak.upgrade()
                && shared.is_active()
            {
                tracing::warn!(%message, "pipeline died, requesting restart");
                shared.scheduler.request(RestartReason::Fatal);
            }
        });

        let mut pipeline = Pipeline::new(ProcessorConfig {
            frame_size: self.config.frame_size,
            underrun_poll: self.config.underrun_poll,
        })
        .with_clock(self.clock.clone())
        .start(
            source,
            vad,
            machine,
            liveness.clone(),
            self.sink.clone(),
            on_fatal,
        )?;

        let weak = self.weak_self.clone();
        let watchdog = spawn_watchdog(
            self.config.watchdog,
            liveness.clone(),
            self.clock.clone(),
            self.timer.as_ref(),
            move |stalled| {
                if let Some(shared) = weak.upgrade() {
                    shared.sink.error(&format!(
                        "No audio processed for {}s, restarting",
                        stalled.as_secs()
                    ));
                    shared.scheduler.request(RestartReason::Stall);
                }
            },
        );
        let mut watchdog = match watchdog {
            Ok(watchdog) => watchdog,
            Err(e) => {
                pipeline.stop(self.config.teardown_timeout);
                return Err(e);
            }
        };

        let mut parts = self.lock_parts();
        if !self.is_active() {
            drop(parts);
            watchdog.stop();
            pipeline.stop(self.config.teardown_timeout);
            return Ok(());
        }
        parts.pipeline = Some(pipeline);
        parts.watchdog = Some(watchdog);
        parts.liveness = Some(liveness);
        Ok(())
    }

    /// Stop the current instance. Threads are joined outside the lock.
    fn teardown_instance(&self) {
        let (pipeline, watchdog) = {
            let mut parts = self.lock_parts();
            parts.liveness = None;
            (parts.pipeline.take(), parts.watchdog.take())
        };
        self.stop_parts(pipeline, watchdog, None);
    }

    fn teardown_all(&self) {
        let parts = std::mem::take(&mut *self.lock_parts());
        self.stop_parts(parts.pipeline, parts.watchdog, parts.scheduled);
    }

    fn stop_parts(
        &self,
        pipeline: Option<PipelineHandle>,
        watchdog: Option<TaskHandle>,
        scheduled: Option<TaskHandle>,
    ) {
        if let Some(mut scheduled) = scheduled {
            scheduled.stop();
        }
        if let Some(mut watchdog) = watchdog {
            watchdog.stop();
        }
        if let Some(mut pipeline) = pipeline {
            pipeline.stop(self.config.teardown_timeout);
        }
    }
}

impl Restartable for MonitorShared {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn restart(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.teardown_instance();
        if !self.is_active() {
            return Ok(());
        }
        tracing::info!(restarts = self.counter.get(), "rebuilding pipeline");
        self.build()
    }

    fn halt(&self, reason: &str) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::error!(%reason, "monitor halted");
        self.teardown_all();
    }
}
