//! The processing loop: read, classify, advance the keyword machine.

use crate::audio::source::AudioSource;
use crate::audio::vad::VoiceActivityDetector;
use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::Result;
use crate::events::EventSink;
use crate::keyword::KeywordStateMachine;
use crate::pipeline::error::ProcessingError;
use crate::pipeline::types::AudioFrame;
use crate::supervisor::Liveness;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Settings for one processing loop.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Samples per frame.
    pub frame_size: usize,
    /// Sleep after a read that returned nothing.
    pub underrun_poll: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            frame_size: defaults::FRAME_SIZE,
            underrun_poll: Duration::from_millis(defaults::UNDERRUN_POLL_MS),
        }
    }
}

/// Requests delivered to the loop between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Drop the current capture and listen for the wake phrase again.
    ResetKeywordState,
}

/// Called once when the loop dies on a fatal error, with the message.
pub type FatalHandler = Box<dyn FnOnce(String) + Send>;

/// Handle to a running processing loop.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    control: Sender<ControlCommand>,
    frames: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Signal the loop to exit and wait for it.
    ///
    /// The loop notices within one read timeout. Threads still running after
    /// `timeout` are detached; a stuck device read must not block a rebuild.
    pub fn stop(&mut self, timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "processing loop did not exit in time, detaching"
                );
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        crate::supervisor::join_thread(handle, "wakeguard-processor");
    }

    /// True until the loop exits, whether stopped or failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a command for the loop. Returns false if it was dropped.
    pub fn send(&self, command: ControlCommand) -> bool {
        match self.control.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(?command, "control queue full, command dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Frames fully processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop(Duration::from_millis(defaults::TEARDOWN_TIMEOUT_MS));
    }
}

/// Builder for the processing loop: AudioSource → VAD → KeywordStateMachine.
pub struct Pipeline {
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets a custom clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the source and start the loop on its own thread.
    ///
    /// Fails when the source cannot be opened; the engine is closed before
    /// returning. Once running, the loop only ends through
    /// [`PipelineHandle::stop`] or a fatal error, which is reported to the
    /// sink and then to `on_fatal`.
    pub fn start(
        self,
        mut source: Box<dyn AudioSource>,
        vad: Box<dyn VoiceActivityDetector>,
        mut machine: KeywordStateMachine,
        liveness: Arc<Liveness>,
        sink: Arc<dyn EventSink>,
        on_fatal: FatalHandler,
    ) -> Result<PipelineHandle> {
        if let Err(e) = source.open() {
            machine.close();
            return Err(e);
        }
        tracing::info!(
            source = source.name(),
            frame_size = self.config.frame_size,
            "audio source opened"
        );

        let running = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));
        let (control_tx, control_rx) = crossbeam_channel::bounded(defaults::CONTROL_BUFFER);

        let worker = Worker {
            config: self.config,
            clock: self.clock,
            source,
            vad,
            machine,
            liveness,
            sink,
            running: running.clone(),
            frames: frames.clone(),
            control: control_rx,
        };

        let spawned = thread::Builder::new()
            .name("wakeguard-processor".to_string())
            .spawn(move || worker.run(on_fatal));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        Ok(PipelineHandle {
            running,
            control: control_tx,
            frames,
            thread: Some(thread),
        })
    }
}

struct Worker {
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
    source: Box<dyn AudioSource>,
    vad: Box<dyn VoiceActivityDetector>,
    machine: KeywordStateMachine,
    liveness: Arc<Liveness>,
    sink: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    control: Receiver<ControlCommand>,
}

impl Worker {
    fn run(mut self, on_fatal: FatalHandler) {
        self.machine.arm();
        let failure = self.process_frames();

        self.machine.close();
        if let Err(e) = self.source.close() {
            tracing::warn!(error = %e, "failed to close audio source");
        }
        let stopped = !self.running.swap(false, Ordering::SeqCst);
        tracing::info!(
            frames = self.frames.load(Ordering::SeqCst),
            detections = self.machine.detections(),
            "processing loop exited"
        );

        if let Some(message) = failure
            && !stopped
        {
            on_fatal(message);
        }
    }

    /// Returns the fatal error message that ended the loop, if any.
    fn process_frames(&mut self) -> Option<String> {
        let mut buffer = vec![0i16; self.config.frame_size.max(1)];
        let mut sequence = 0u64;

        while self.running.load(Ordering::SeqCst) {
            self.drain_control();

            let read = match self.source.read(&mut buffer) {
                Ok(read) => read,
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "transient read error");
                    thread::sleep(self.config.underrun_poll);
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, source = self.source.name(), "audio read failed");
                    let message = e.to_string();
                    self.sink.error(&message);
                    return Some(message);
                }
            };

            if read == 0 {
                thread::sleep(self.config.underrun_poll);
                continue;
            }

            let frame = AudioFrame::new(buffer[..read].to_vec(), self.clock.now(), sequence);
            sequence += 1;
            let classified = self.vad.classify(frame);
            tracing::trace!(
                sequence = classified.sequence(),
                level = classified.level,
                speech = classified.is_speech,
                state = %self.machine.state(),
                "frame"
            );

            match self.machine.process(&classified) {
                Ok(()) => {}
                Err(ProcessingError::Recoverable(message)) => {
                    tracing::debug!(%message, "frame skipped after recoverable error");
                }
                Err(ProcessingError::Fatal(message)) => {
                    tracing::error!(%message, "fatal processing error");
                    return Some(message);
                }
            }

            self.frames.fetch_add(1, Ordering::SeqCst);
            self.liveness.touch(self.clock.now());
        }

        None
    }

    fn drain_control(&mut self) {
        while let Ok(command) = self.control.try_recv() {
            match command {
                ControlCommand::ResetKeywordState => {
                    self.machine.reset_keyword_state();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{ScriptedAudioSource, ScriptedRead, WhenExhausted};
    use crate::audio::vad::{ActivityLevelDetector, VadConfig};
    use crate::clock::MockClock;
    use crate::events::CollectorSink;
    use crate::keyword::MachineConfig;
    use crate::recognition::scripted::{FrameStep, ScriptedEngine};
    use std::sync::Mutex;

    const FRAME: usize = 160;

    fn speech() -> Vec<i16> {
        vec![4000; FRAME]
    }

    struct Harness {
        clock: MockClock,
        liveness: Arc<Liveness>,
        sink: Arc<CollectorSink>,
        fatal: Arc<Mutex<Option<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = MockClock::new();
            Self {
                liveness: Arc::new(Liveness::new(clock.now())),
                clock,
                sink: Arc::new(CollectorSink::new()),
                fatal: Arc::new(Mutex::new(None)),
            }
        }

        fn start(
            &self,
            source: ScriptedAudioSource,
            engine: ScriptedEngine,
        ) -> Result<PipelineHandle> {
            let machine = KeywordStateMachine::new(
                MachineConfig::default(),
                Box::new(engine),
                self.sink.clone(),
            );
            let fatal = self.fatal.clone();
            Pipeline::new(ProcessorConfig {
                frame_size: FRAME,
                underrun_poll: Duration::from_millis(1),
            })
            .with_clock(Arc::new(self.clock.clone()))
            .start(
                Box::new(source),
                Box::new(ActivityLevelDetector::new(VadConfig::default())),
                machine,
                self.liveness.clone(),
                self.sink.clone(),
                Box::new(move |message| {
                    *fatal.lock().unwrap() = Some(message);
                }),
            )
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_frames_reach_machine_and_touch_liveness() {
        let h = Harness::new();
        h.clock.advance(Duration::from_secs(5));
        let source = ScriptedAudioSource::new().with_frames(vec![speech(), speech()]);
        let engine = ScriptedEngine::new().then_text("minerva");

        let mut handle = h.start(source, engine).unwrap();
        assert!(wait_for(|| handle.frames_processed() == 2));
        assert_eq!(h.sink.detections(), 1);
        assert_eq!(h.liveness.stalled_for(h.clock.now()), Duration::ZERO);

        handle.stop(Duration::from_secs(5));
        assert!(!handle.is_running());
        assert!(h.fatal.lock().unwrap().is_none());
    }

    #[test]
    fn test_underruns_are_not_end_of_stream() {
        let h = Harness::new();
        let source = ScriptedAudioSource::new()
            .then(ScriptedRead::Underrun)
            .then(ScriptedRead::Busy)
            .then(ScriptedRead::Underrun)
            .then(ScriptedRead::Samples(speech()))
            .when_exhausted(WhenExhausted::Underrun);

        let mut handle = h.start(source, ScriptedEngine::new()).unwrap();
        assert!(wait_for(|| handle.frames_processed() == 1));
        thread::sleep(Duration::from_millis(20));
        assert!(handle.is_running());

        handle.stop(Duration::from_secs(5));
        assert!(h.sink.errors().is_empty());
    }

    #[test]
    fn test_read_error_is_fatal() {
        let h = Harness::new();
        let source = ScriptedAudioSource::new().then(ScriptedRead::Fail("unplugged".to_string()));

        let handle = h.start(source, ScriptedEngine::new()).unwrap();
        assert!(wait_for(|| !handle.is_running()));
        assert!(wait_for(|| h.fatal.lock().unwrap().is_some()));

        let message = h.fatal.lock().unwrap().clone().unwrap();
        assert!(message.contains("unplugged"));
        assert_eq!(h.sink.errors().len(), 1);
    }

    #[test]
    fn test_fatal_engine_error_stops_loop() {
        let h = Harness::new();
        let source = ScriptedAudioSource::new().with_frames(vec![speech()]);
        let engine = ScriptedEngine::new().then_step(FrameStep::Fatal("model gone".to_string()));

        let handle = h.start(source, engine).unwrap();
        assert!(wait_for(|| h.fatal.lock().unwrap().is_some()));
        assert!(!handle.is_running());
        assert_eq!(handle.frames_processed(), 0);
    }

    #[test]
    fn test_recoverable_engine_error_keeps_running() {
        let h = Harness::new();
        let source = ScriptedAudioSource::new().with_frames(vec![speech(), speech()]);
        let engine = ScriptedEngine::new()
            .then_step(FrameStep::Fail("hiccup".to_string()))
            .then_text("minerva");

        let mut handle = h.start(source, engine).unwrap();
        assert!(wait_for(|| h.sink.detections() == 1));
        assert_eq!(h.sink.errors().len(), 1);
        assert!(handle.is_running());

        handle.stop(Duration::from_secs(5));
        assert!(h.fatal.lock().unwrap().is_none());
    }

    #[test]
    fn test_open_failure_is_returned() {
        let h = Harness::new();
        let source = ScriptedAudioSource::new().with_open_failure("no microphone");
        let engine = ScriptedEngine::new();
        let probe = engine.probe();

        assert!(h.start(source, engine).is_err());
        assert_eq!(probe.closes(), 1);
    }

    #[test]
    fn test_stop_closes_engine_without_fatal() {
        let h = Harness::new();
        let engine = ScriptedEngine::new();
        let probe = engine.probe();

        let mut handle = h.start(ScriptedAudioSource::new(), engine).unwrap();
        handle.stop(Duration::from_secs(5));
        handle.stop(Duration::from_secs(5));

        assert_eq!(probe.closes(), 1);
        assert!(h.fatal.lock().unwrap().is_none());
    }

    #[test]
    fn test_reset_command_rearms_without_completion() {
        let h = Harness::new();
        let source = ScriptedAudioSource::new().with_frames(vec![speech()]);
        let engine = ScriptedEngine::new().then_text("minerva");
        let probe = engine.probe();

        let mut handle = h.start(source, engine).unwrap();
        assert!(wait_for(|| h.sink.detections() == 1));
        assert_eq!(probe.resets(), 1);

        assert!(handle.send(ControlCommand::ResetKeywordState));
        assert!(wait_for(|| probe.resets() == 2));
        handle.stop(Duration::from_secs(5));

        assert!(h.sink.completions().is_empty());
    }
}
