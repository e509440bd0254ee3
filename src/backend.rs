//! Capture and recognition strategies.
//!
//! A [`Backend`] builds a fresh audio source and recognition engine for
//! every pipeline instance, so a restart never reuses a device handle or a
//! model state from the pipeline it replaces.

use crate::audio::source::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::config::{BackendKind, Config};
use crate::error::{Result, WakeguardError};
use crate::recognition::{RecognitionEngine, ScriptedEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Factory for the per-pipeline collaborators.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// A new, unopened audio source.
    fn audio_source(&self) -> Result<Box<dyn AudioSource>>;

    /// A new recognition engine.
    fn recognition_engine(&self) -> Result<Box<dyn RecognitionEngine>>;
}

/// Replayed audio and a scripted recognizer.
///
/// Without a WAV file the source delivers silence in real time, which keeps
/// the loop and the watchdog exercised but never detects anything.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    wav: Option<PathBuf>,
    script: Option<PathBuf>,
    phrases: Vec<String>,
    sample_rate: u32,
}

impl SimulatedBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            wav: None,
            script: None,
            phrases: Vec::new(),
            sample_rate,
        }
    }

    pub fn with_wav(mut self, path: impl Into<PathBuf>) -> Self {
        self.wav = Some(path.into());
        self
    }

    /// Phrase script file; takes precedence over inline phrases.
    pub fn with_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.script = Some(path.into());
        self
    }

    pub fn with_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phrases = phrases.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let mut backend =
            Self::new(config.audio.sample_rate).with_phrases(config.backend.phrases.clone());
        if let Some(wav) = &config.backend.wav {
            backend = backend.with_wav(wav);
        }
        if let Some(script) = &config.backend.script {
            backend = backend.with_script(script);
        }
        backend
    }
}

impl Backend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn audio_source(&self) -> Result<Box<dyn AudioSource>> {
        let source = match &self.wav {
            Some(path) => WavAudioSource::from_path(path, self.sample_rate)?,
            None => WavAudioSource::silence(self.sample_rate),
        };
        Ok(Box::new(source))
    }

    fn recognition_engine(&self) -> Result<Box<dyn RecognitionEngine>> {
        let engine = match &self.script {
            Some(path) => ScriptedEngine::from_script_file(path)?,
            None => ScriptedEngine::from_phrases(self.phrases.iter().cloned()),
        };
        Ok(Box::new(engine))
    }
}

/// Microphone capture and Whisper recognition.
///
/// Each half needs its cargo feature; without it the factory method fails
/// with [`WakeguardError::FeatureDisabled`], which the monitor handles like
/// any other fatal start error.
#[derive(Debug, Clone)]
pub struct LiveBackend {
    device: Option<String>,
    sample_rate: u32,
    read_timeout: Duration,
    model: Option<PathBuf>,
    language: String,
}

impl LiveBackend {
    pub fn from_config(config: &Config) -> Self {
        Self {
            device: config.audio.device.clone(),
            sample_rate: config.audio.sample_rate,
            read_timeout: Duration::from_millis(config.audio.read_timeout_ms),
            model: config.backend.model.clone(),
            language: config.backend.language.clone(),
        }
    }

    fn model_path(&self) -> Result<&PathBuf> {
        self.model
            .as_ref()
            .ok_or_else(|| WakeguardError::ConfigInvalidValue {
                key: "backend.model".to_string(),
                message: "the live backend needs a Whisper model path".to_string(),
            })
    }
}

impl Backend for LiveBackend {
    fn name(&self) -> &'static str {
        "live"
    }

    #[cfg(feature = "cpal-audio")]
    fn audio_source(&self) -> Result<Box<dyn AudioSource>> {
        let source = crate::audio::capture::CpalAudioSource::new(
            self.device.as_deref(),
            self.sample_rate,
            self.read_timeout,
        )?;
        Ok(Box::new(source))
    }

    #[cfg(not(feature = "cpal-audio"))]
    fn audio_source(&self) -> Result<Box<dyn AudioSource>> {
        tracing::debug!(
            device = ?self.device,
            sample_rate = self.sample_rate,
            read_timeout_ms = self.read_timeout.as_millis() as u64,
            "microphone capture not compiled in"
        );
        Err(WakeguardError::FeatureDisabled {
            backend: self.name().to_string(),
            feature: "cpal-audio".to_string(),
        })
    }

    #[cfg(feature = "whisper")]
    fn recognition_engine(&self) -> Result<Box<dyn RecognitionEngine>> {
        use crate::recognition::{WhisperConfig, WhisperEngine};

        let config = WhisperConfig {
            model_path: self.model_path()?.clone(),
            language: self.language.clone(),
            sample_rate: self.sample_rate,
            ..WhisperConfig::default()
        };
        Ok(Box::new(WhisperEngine::new(config)?))
    }

    #[cfg(not(feature = "whisper"))]
    fn recognition_engine(&self) -> Result<Box<dyn RecognitionEngine>> {
        let model = self.model_path()?;
        tracing::debug!(model = %model.display(), language = %self.language, "whisper not compiled in");
        Err(WakeguardError::FeatureDisabled {
            backend: self.name().to_string(),
            feature: "whisper".to_string(),
        })
    }
}

/// Build the backend selected in `config.backend.kind`.
pub fn from_config(config: &Config) -> Arc<dyn Backend> {
    match config.backend.kind {
        BackendKind::Simulated => Arc::new(SimulatedBackend::from_config(config)),
        BackendKind::Live => Arc::new(LiveBackend::from_config(config)),
    }
}
