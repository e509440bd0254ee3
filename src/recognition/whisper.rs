//! Whisper-based recognition engine.
//!
//! Whisper decodes whole chunks rather than streaming frames, so the engine
//! buffers speech and transcribes when the utterance ends or the buffer
//! reaches the chunk limit. Results accumulate for the utterance, which
//! makes every new result extend the previous one.
//!
//! # Feature Gate
//!
//! [`WhisperEngine`] requires the `whisper` feature (and cmake to build).

use crate::defaults;
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use crate::error::{Result, WakeguardError};
#[cfg(feature = "whisper")]
use crate::recognition::RecognitionEngine;
#[cfg(feature = "whisper")]
use std::sync::Once;
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Language value that lets Whisper detect the language.
pub const AUTO_LANGUAGE: &str = "auto";

/// Configuration for the Whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Language code (e.g., "en", "es") or "auto"
    pub language: String,
    /// Number of threads for inference (None = whisper default)
    pub threads: Option<usize>,
    /// Audio sample rate of incoming frames
    pub sample_rate: u32,
    /// Longest chunk transcribed in one go, in milliseconds
    pub max_chunk_ms: u64,
    /// Utterances shorter than this are dropped, in milliseconds
    pub min_chunk_ms: u64,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: AUTO_LANGUAGE.to_string(),
            threads: None,
            sample_rate: defaults::SAMPLE_RATE,
            max_chunk_ms: 8_000,
            min_chunk_ms: 250,
        }
    }
}

impl WhisperConfig {
    /// Number of samples covering `ms` milliseconds.
    pub fn samples_for(&self, ms: u64) -> usize {
        (self.sample_rate as u64 * ms / 1000) as usize
    }
}

/// Convert i16 audio samples to f32 normalized to [-1.0, 1.0].
pub fn convert_audio(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

#[cfg(feature = "whisper")]
pub struct WhisperEngine {
    context: WhisperContext,
    config: WhisperConfig,
    buffer: Vec<i16>,
    utterance: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

#[cfg(feature = "whisper")]
impl WhisperEngine {
    /// Load the model.
    ///
    /// # Errors
    /// Returns `WakeguardError::RecognitionModelNotFound` if the model file doesn't exist
    /// Returns `WakeguardError::RecognitionUnavailable` if model loading fails
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(WakeguardError::RecognitionModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_path =
            config
                .model_path
                .to_str()
                .ok_or_else(|| WakeguardError::RecognitionUnavailable {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?;

        let context =
            WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .map_err(|e| WakeguardError::RecognitionUnavailable {
                    message: format!("Failed to load Whisper model: {}", e),
                })?;

        tracing::info!(model = %config.model_path.display(), language = %config.language, "whisper model loaded");

        Ok(Self {
            context,
            config,
            buffer: Vec::new(),
            utterance: String::new(),
        })
    }

    /// Transcribe the buffered audio and append it to the utterance text.
    fn flush(&mut self) -> Result<bool> {
        let audio = std::mem::take(&mut self.buffer);
        if audio.len() < self.config.samples_for(self.config.min_chunk_ms) {
            return Ok(false);
        }

        let text = self.transcribe(&audio)?;
        if text.is_empty() {
            return Ok(false);
        }

        if !self.utterance.is_empty() {
            self.utterance.push(' ');
        }
        self.utterance.push_str(&text);
        Ok(true)
    }

    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        let audio_f32 = convert_audio(audio);

        let mut state =
            self.context
                .create_state()
                .map_err(|e| WakeguardError::RecognitionUnavailable {
                    message: format!("Failed to create Whisper state: {}", e),
                })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if self.config.language == AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.config.language));
        }
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| WakeguardError::Recognition {
                message: format!("Whisper inference failed: {}", e),
            })?;

        let mut transcription = String::new();
        for segment in state.as_iter() {
            transcription.push_str(&segment.to_string());
        }
        let text = transcription.trim().to_string();
        tracing::debug!(samples = audio.len(), %text, "whisper chunk transcribed");
        Ok(text)
    }
}

#[cfg(feature = "whisper")]
impl RecognitionEngine for WhisperEngine {
    fn accept_frame(&mut self, samples: &[i16]) -> Result<bool> {
        self.buffer.extend_from_slice(samples);
        if self.buffer.len() >= self.config.samples_for(self.config.max_chunk_ms) {
            return self.flush();
        }
        Ok(false)
    }

    fn partial_result(&self) -> String {
        self.utterance.clone()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.utterance.clear();
    }

    fn finish_utterance(&mut self) -> Result<bool> {
        self.flush()
    }

    fn close(&mut self) {
        self.reset();
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whisper_config_default() {
        let config = WhisperConfig::default();
        assert_eq!(config.model_path, PathBuf::from("models/ggml-base.bin"));
        assert_eq!(config.language, AUTO_LANGUAGE);
        assert_eq!(config.threads, None);
        assert_eq!(config.sample_rate, 16000);
    }

    #[test]
    fn test_samples_for_duration() {
        let config = WhisperConfig::default();
        assert_eq!(config.samples_for(1000), 16000);
        assert_eq!(config.samples_for(250), 4000);
    }

    #[test]
    fn test_convert_audio_range() {
        let converted = convert_audio(&[0, i16::MIN, 16384]);
        assert_eq!(converted[0], 0.0);
        assert_eq!(converted[1], -1.0);
        assert_eq!(converted[2], 0.5);
    }

    #[cfg(feature = "whisper")]
    #[test]
    fn test_missing_model_is_reported() {
        let config = WhisperConfig {
            model_path: PathBuf::from("/nonexistent/ggml-tiny.bin"),
            ..WhisperConfig::default()
        };
        match WhisperEngine::new(config) {
            Err(WakeguardError::RecognitionModelNotFound { path }) => {
                assert!(path.contains("ggml-tiny.bin"));
            }
            other => panic!("Expected RecognitionModelNotFound, got {:?}", other),
        }
    }
}
