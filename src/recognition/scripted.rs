//! Recognizer that replays scripted text instead of decoding audio.
//!
//! Two scripts can be combined:
//! - per-frame steps, consumed one per accepted speech frame, for tests that
//!   need exact control over which frame yields which text;
//! - per-utterance phrases, handed out in order (cycling) whenever an
//!   utterance ends, which is what the simulated backend uses.

use crate::error::{Result, WakeguardError};
use crate::recognition::RecognitionEngine;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of one accepted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStep {
    Nothing,
    Text(String),
    /// Recoverable recognition failure.
    Fail(String),
    /// The engine is gone.
    Fatal(String),
}

/// Counters shared with a [`ScriptedEngine`] after it was boxed away.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    frames: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl EngineProbe {
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    steps: VecDeque<FrameStep>,
    phrases: Vec<String>,
    next_phrase: usize,
    frames_in_utterance: usize,
    partial: String,
    probe: EngineProbe,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that yields one phrase per utterance.
    pub fn from_phrases<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.trim().is_empty())
                .collect(),
            ..Self::default()
        }
    }

    /// Load a phrase script, one utterance per line. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn from_script_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            WakeguardError::RecognitionModelNotFound {
                path: format!("{}: {}", path.display(), e),
            }
        })?;
        let phrases = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect::<Vec<_>>();
        tracing::debug!(path = %path.display(), phrases = phrases.len(), "loaded phrase script");
        Ok(Self::from_phrases(phrases))
    }

    /// Next accepted frame yields `text`.
    pub fn then_text(mut self, text: &str) -> Self {
        self.steps.push_back(FrameStep::Text(text.to_string()));
        self
    }

    /// Next `count` accepted frames each yield `text`.
    pub fn then_text_for(mut self, text: &str, count: usize) -> Self {
        for _ in 0..count {
            self.steps.push_back(FrameStep::Text(text.to_string()));
        }
        self
    }

    /// Next `count` accepted frames yield nothing.
    pub fn then_nothing(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.steps.push_back(FrameStep::Nothing);
        }
        self
    }

    pub fn then_step(mut self, step: FrameStep) -> Self {
        self.steps.push_back(step);
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn accept_frame(&mut self, _samples: &[i16]) -> Result<bool> {
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        self.frames_in_utterance += 1;

        match self.steps.pop_front() {
            None | Some(FrameStep::Nothing) => Ok(false),
            Some(FrameStep::Text(text)) => {
                self.partial = text;
                Ok(true)
            }
            Some(FrameStep::Fail(message)) => Err(WakeguardError::Recognition { message }),
            Some(FrameStep::Fatal(message)) => {
                Err(WakeguardError::RecognitionUnavailable { message })
            }
        }
    }

    fn partial_result(&self) -> String {
        self.partial.clone()
    }

    fn reset(&mut self) {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
        self.partial.clear();
        self.frames_in_utterance = 0;
    }

    fn finish_utterance(&mut self) -> Result<bool> {
        let heard = std::mem::take(&mut self.frames_in_utterance);
        if heard == 0 || self.phrases.is_empty() {
            return Ok(false);
        }
        let index = self.next_phrase % self.phrases.len();
        self.next_phrase += 1;
        self.partial = self.phrases[index].clone();
        Ok(true)
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
