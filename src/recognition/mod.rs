//! Speech recognition engines.
//!
//! The keyword state machine talks to recognizers only through
//! [`RecognitionEngine`]: feed frames, ask for the current text, reset.

pub mod scripted;
pub mod whisper;

use crate::error::Result;

pub use scripted::{EngineProbe, ScriptedEngine};
#[cfg(feature = "whisper")]
pub use whisper::WhisperEngine;
pub use whisper::WhisperConfig;

/// Incremental speech recognizer.
pub trait RecognitionEngine: Send {
    /// Feed one frame of 16-bit PCM.
    ///
    /// Returns `true` when a new result is available through
    /// [`RecognitionEngine::partial_result`].
    fn accept_frame(&mut self, samples: &[i16]) -> Result<bool>;

    /// Text recognized for the current utterance so far.
    fn partial_result(&self) -> String;

    /// Drop all state for the current utterance.
    fn reset(&mut self);

    /// Called on the first silent frame after speech.
    ///
    /// Engines that work on whole chunks flush buffered audio here. Returns
    /// `true` when that produced a new result.
    fn finish_utterance(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Release model resources. Called once at teardown.
    fn close(&mut self) {}

    fn name(&self) -> &'static str;
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Box<E> {
    fn accept_frame(&mut self, samples: &[i16]) -> Result<bool> {
        (**self).accept_frame(samples)
    }

    fn partial_result(&self) -> String {
        (**self).partial_result()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn finish_utterance(&mut self) -> Result<bool> {
        (**self).finish_utterance()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
