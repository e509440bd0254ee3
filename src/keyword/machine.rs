//! Frame-by-frame keyword detection and capture.
//!
//! ```text
//! Idle ─arm─▶ Armed ─keyword─▶ Detected ─▶ Transcribing ─silence─▶ Completing ─▶ Armed
//!               ▲                                │
//!               └──────── reset_keyword_state ───┘
//! ```
//!
//! All timing uses frame timestamps, never the wall clock, so a replayed or
//! scripted stream behaves exactly like a live one.

use crate::defaults;
use crate::error::WakeguardError;
use crate::events::EventSink;
use crate::keyword::session::TranscriptionSession;
use crate::keyword::state::KeywordState;
use crate::pipeline::error::ProcessingError;
use crate::pipeline::types::VadFrame;
use crate::recognition::RecognitionEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Wake phrase, matched case-insensitively.
    pub keyword: String,
    /// Silence after the last speech frame that ends a capture.
    pub silence_threshold: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            keyword: defaults::KEYWORD.to_string(),
            silence_threshold: Duration::from_millis(defaults::SILENCE_THRESHOLD_MS),
        }
    }
}

pub struct KeywordStateMachine {
    keyword: String,
    silence_threshold: Duration,
    engine: Box<dyn RecognitionEngine>,
    sink: Arc<dyn EventSink>,
    state: KeywordState,
    session: Option<TranscriptionSession>,
    keyword_pending: bool,
    in_speech: bool,
    detections: u64,
}

impl KeywordStateMachine {
    pub fn new(
        config: MachineConfig,
        engine: Box<dyn RecognitionEngine>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            keyword: config.keyword.trim().to_lowercase(),
            silence_threshold: config.silence_threshold,
            engine,
            sink,
            state: KeywordState::Idle,
            session: None,
            keyword_pending: false,
            in_speech: false,
            detections: 0,
        }
    }

    /// Start listening for the wake phrase.
    pub fn arm(&mut self) {
        if self.state == KeywordState::Idle {
            tracing::debug!(keyword = %self.keyword, engine = self.engine.name(), "armed");
            self.state = KeywordState::Armed;
        }
    }

    /// Advance the machine by one classified frame.
    ///
    /// Recognition errors are reported to the sink before they are returned.
    /// After a recoverable error the state is unchanged; a fatal one means
    /// the pipeline has to be rebuilt.
    pub fn process(&mut self, frame: &VadFrame) -> Result<(), ProcessingError> {
        let timestamp = frame.timestamp();

        match self.state {
            KeywordState::Idle => return Ok(()),
            KeywordState::Detected => self.begin_transcription(timestamp),
            KeywordState::Completing => self.complete(),
            KeywordState::Armed | KeywordState::Transcribing => {}
        }

        if frame.is_speech {
            self.in_speech = true;
            if let Some(session) = self.session.as_mut() {
                session.mark_audio(timestamp);
            }

            let produced = self
                .engine
                .accept_frame(frame.samples())
                .map_err(|e| self.report(e))?;
            if produced {
                let text = self.engine.partial_result();
                self.handle_result(&text, timestamp);
            }
            return Ok(());
        }

        let mut outcome = Ok(());
        if std::mem::take(&mut self.in_speech) {
            match self.engine.finish_utterance() {
                Ok(true) => {
                    let text = self.engine.partial_result();
                    self.handle_result(&text, timestamp);
                }
                Ok(false) => {}
                Err(e) => {
                    let error = self.report(e);
                    if error.is_fatal() {
                        return Err(error);
                    }
                    outcome = Err(error);
                }
            }
        }

        if self.state == KeywordState::Transcribing && self.silence_elapsed(timestamp) {
            self.state = KeywordState::Completing;
            self.complete();
        }

        outcome
    }

    /// Abandon the current capture and listen for the wake phrase again.
    ///
    /// No completion is reported. Returns `false` when nothing was in progress.
    pub fn reset_keyword_state(&mut self) -> bool {
        if !self.state.is_capturing() {
            return false;
        }
        tracing::info!(state = %self.state, "keyword state reset");
        self.session = None;
        self.engine.reset();
        self.rearm();
        true
    }

    /// Release the engine. The machine ignores frames afterwards.
    pub fn close(&mut self) {
        self.engine.close();
        self.session = None;
        self.state = KeywordState::Idle;
    }

    pub fn state(&self) -> KeywordState {
        self.state
    }

    pub fn session(&self) -> Option<&TranscriptionSession> {
        self.session.as_ref()
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Wake phrases detected by this machine.
    pub fn detections(&self) -> u64 {
        self.detections
    }

    fn handle_result(&mut self, text: &str, timestamp: Instant) {
        match self.state {
            KeywordState::Armed => {
                if !self.keyword_pending && contains_keyword(text, &self.keyword) {
                    self.detect(timestamp);
                    let tail = text_after_keyword(text, &self.keyword);
                    self.apply_to_session(&tail);
                } else {
                    tracing::trace!(%text, "no keyword in result");
                }
            }
            KeywordState::Transcribing => {
                let cleaned = strip_keyword(text, &self.keyword);
                self.apply_to_session(&cleaned);
            }
            _ => {}
        }
    }

    fn apply_to_session(&mut self, text: &str) {
        if let Some(session) = self.session.as_mut()
            && session.apply(text)
        {
            let cumulative = session.text();
            tracing::debug!(text = %cumulative, "transcription update");
            self.sink.transcription_update(&cumulative);
        }
    }

    fn detect(&mut self, timestamp: Instant) {
        self.state = KeywordState::Detected;
        self.keyword_pending = true;
        self.detections += 1;
        tracing::info!(keyword = %self.keyword, detections = self.detections, "keyword detected");
        self.begin_transcription(timestamp);
    }

    fn begin_transcription(&mut self, timestamp: Instant) {
        self.session = Some(TranscriptionSession::new(timestamp));
        self.state = KeywordState::Transcribing;
        self.sink.keyword_detected();
        self.engine.reset();
    }

    fn complete(&mut self) {
        let (text, updates) = match self.session.take() {
            Some(session) => {
                let updates = session.updates();
                (session.into_text(), updates)
            }
            None => (String::new(), 0),
        };
        tracing::info!(%text, updates, "transcription complete");
        self.sink.transcription_complete(&text);
        self.engine.reset();
        self.rearm();
    }

    fn rearm(&mut self) {
        self.state = KeywordState::Armed;
        self.keyword_pending = false;
        self.in_speech = false;
    }

    fn silence_elapsed(&self, timestamp: Instant) -> bool {
        self.session.as_ref().is_some_and(|session| {
            timestamp.saturating_duration_since(session.last_audio_time()) >= self.silence_threshold
        })
    }

    fn report(&self, error: WakeguardError) -> ProcessingError {
        let error = ProcessingError::from(error);
        if error.is_fatal() {
            tracing::error!(engine = self.engine.name(), %error, "recognition engine failed");
        } else {
            tracing::warn!(engine = self.engine.name(), %error, "recognition error");
        }
        self.sink.error(error.message());
        error
    }
}

fn contains_keyword(text: &str, keyword: &str) -> bool {
    !keyword.is_empty() && text.to_lowercase().contains(keyword)
}

/// Text following the last occurrence of `keyword`, without the punctuation
/// that separates it from the wake phrase.
fn text_after_keyword(text: &str, keyword: &str) -> String {
    if keyword.is_empty() {
        return String::new();
    }
    let end = text
        .char_indices()
        .filter_map(|(index, _)| {
            keyword_prefix_len(&text[index..], keyword).map(|len| index + len)
        })
        .last();
    match end {
        Some(end) => {
            let tail = text[end..]
                .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation());
            strip_keyword(tail, keyword)
        }
        None => String::new(),
    }
}

/// Remove every case-insensitive occurrence of `keyword` and normalize spaces.
pub fn strip_keyword(text: &str, keyword: &str) -> String {
    if keyword.is_empty() {
        return text.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    let mut kept = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(len) = keyword_prefix_len(rest, keyword) {
            kept.push(' ');
            rest = &rest[len..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            kept.push(c);
        }
        rest = chars.as_str();
    }

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte length of `keyword` at the start of `text`, ignoring case.
fn keyword_prefix_len(text: &str, keyword: &str) -> Option<usize> {
    let mut text_chars = text.char_indices();
    for expected in keyword.chars() {
        let (_, actual) = text_chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    Some(text_chars.next().map_or(text.len(), |(index, _)| index))
}
