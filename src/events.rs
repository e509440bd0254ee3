//! Lifecycle events delivered to the host.
//!
//! The monitor reports everything the host needs through four callbacks on
//! [`EventSink`]. Sinks are shared across pipeline rebuilds, so they take
//! `&self` and must be `Send + Sync`.

use crossbeam_channel::Sender;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// One callback worth of information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    KeywordDetected,
    TranscriptionUpdate { text: String },
    TranscriptionComplete { text: String },
    Error { message: String },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::KeywordDetected => "keyword_detected",
            MonitorEvent::TranscriptionUpdate { .. } => "transcription_update",
            MonitorEvent::TranscriptionComplete { .. } => "transcription_complete",
            MonitorEvent::Error { .. } => "error",
        }
    }
}

/// Receiver of monitor lifecycle callbacks.
///
/// Implementors only need [`EventSink::emit`]; the named callbacks route
/// through it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);

    fn keyword_detected(&self) {
        self.emit(MonitorEvent::KeywordDetected);
    }

    fn transcription_update(&self, text: &str) {
        self.emit(MonitorEvent::TranscriptionUpdate {
            text: text.to_string(),
        });
    }

    fn transcription_complete(&self, text: &str) {
        self.emit(MonitorEvent::TranscriptionComplete {
            text: text.to_string(),
        });
    }

    fn error(&self, message: &str) {
        self.emit(MonitorEvent::Error {
            message: message.to_string(),
        });
    }
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: MonitorEvent) {
        (**self).emit(event);
    }
}

/// Records every event, for tests and embedding hosts that poll.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: Mutex<Vec<MonitorEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.lock().clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<MonitorEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn detections(&self) -> usize {
        self.count("keyword_detected")
    }

    /// Texts of every completed transcription, in order.
    pub fn completions(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::TranscriptionComplete { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::TranscriptionUpdate { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MonitorEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: MonitorEvent) {
        self.lock().push(event);
    }
}

/// Turns events into log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::KeywordDetected => tracing::info!("keyword detected"),
            MonitorEvent::TranscriptionUpdate { text } => {
                tracing::debug!(%text, "transcription update")
            }
            MonitorEvent::TranscriptionComplete { text } => {
                tracing::info!(%text, "transcription complete")
            }
            MonitorEvent::Error { message } => tracing::error!(%message, "monitor error"),
        }
    }
}

/// Forwards events over a channel. Events are dropped when the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<MonitorEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<MonitorEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: MonitorEvent) {
        if let Err(e) = self.sender.try_send(event) {
            tracing::debug!(event = e.into_inner().name(), "event channel full or closed");
        }
    }
}

/// Delivers every event to several sinks in order.
#[derive(Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanOutSink {
    fn emit(&self, event: MonitorEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

/// Writes one JSON object per event and line.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: MonitorEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event");
                return;
            }
        };
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(writer, "{}", line).and_then(|()| writer.flush()) {
            tracing::warn!(error = %e, "failed to write event");
        }
    }
}

/// Human-readable event output on stderr.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

#[cfg(feature = "cli")]
impl EventSink for ConsoleSink {
    fn emit(&self, event: MonitorEvent) {
        use owo_colors::OwoColorize;

        match event {
            MonitorEvent::KeywordDetected => eprintln!("{}", "● listening".green()),
            MonitorEvent::TranscriptionUpdate { text } => {
                eprint!("\r\x1b[2K{}", text.dimmed());
                io::stderr().flush().ok();
            }
            MonitorEvent::TranscriptionComplete { text } => {
                eprint!("\r\x1b[2K");
                if text.is_empty() {
                    eprintln!("{}", "(nothing heard)".dimmed());
                } else {
                    eprintln!("{}", text.bold());
                }
            }
            MonitorEvent::Error { message } => {
                eprintln!("{}", format!("Error: {}", message).red());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_named_callbacks_route_through_emit() {
        let sink = CollectorSink::new();
        sink.keyword_detected();
        sink.transcription_update("hola");
        sink.transcription_complete("hola mundo");
        sink.error("boom");

        assert_eq!(
            sink.events(),
            vec![
                MonitorEvent::KeywordDetected,
                MonitorEvent::TranscriptionUpdate {
                    text: "hola".to_string()
                },
                MonitorEvent::TranscriptionComplete {
                    text: "hola mundo".to_string()
                },
                MonitorEvent::Error {
                    message: "boom".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_collector_helpers() {
        let sink = CollectorSink::new();
        sink.keyword_detected();
        sink.transcription_complete("one");
        sink.keyword_detected();
        sink.transcription_complete("two");

        assert_eq!(sink.detections(), 2);
        assert_eq!(sink.completions(), vec!["one", "two"]);
        assert!(sink.errors().is_empty());

        assert_eq!(sink.take().len(), 4);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&MonitorEvent::TranscriptionComplete {
            text: "hola mundo".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"event":"transcription_complete","text":"hola mundo"}"#
        );

        let json = serde_json::to_string(&MonitorEvent::KeywordDetected).unwrap();
        assert_eq!(json, r#"{"event":"keyword_detected"}"#);
    }

    #[test]
    fn test_json_lines_sink_writes_one_line_per_event() {
        let buffer = SharedBuffer::default();
        let sink = JsonLinesSink::new(Box::new(buffer.clone()));

        sink.keyword_detected();
        sink.error("device gone");

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], r#"{"event":"error","message":"device gone"}"#);
    }

    #[test]
    fn test_channel_sink_forwards_and_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sink = ChannelSink::new(tx);

        sink.keyword_detected();
        sink.keyword_detected();

        assert_eq!(rx.try_recv().unwrap(), MonitorEvent::KeywordDetected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fan_out_delivers_to_all() {
        let first = Arc::new(CollectorSink::new());
        let second = Arc::new(CollectorSink::new());
        let sink = FanOutSink::new()
            .with(first.clone())
            .with(second.clone());

        sink.transcription_complete("done");

        assert_eq!(first.completions(), vec!["done"]);
        assert_eq!(second.completions(), vec!["done"]);
    }

    #[test]
    fn test_log_sink_doesnt_panic() {
        LogSink.keyword_detected();
        LogSink.error("logged");
    }

    #[test]
    fn test_sink_is_object_safe() {
        let _sink: Arc<dyn EventSink> = Arc::new(CollectorSink::new());
    }
}
