//! Error types for wakeguard.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakeguardError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device busy: {message}")]
    AudioDeviceBusy { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio stream closed")]
    AudioStreamClosed,

    // Recognition engine errors
    #[error("Recognition model not found at {path}")]
    RecognitionModelNotFound { path: String },

    #[error("Recognition engine unavailable: {message}")]
    RecognitionUnavailable { message: String },

    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    // Backend selection errors
    #[error("Backend '{backend}' requires the '{feature}' feature")]
    FeatureDisabled { backend: String, feature: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl WakeguardError {
    /// Errors the processing loop ignores, like a zero-length read.
    pub fn is_transient(&self) -> bool {
        matches!(self, WakeguardError::AudioDeviceBusy { .. })
    }

    /// Errors after which the pipeline cannot continue and must be rebuilt.
    ///
    /// A single failed recognition is recoverable; everything that means the
    /// device or the engine is gone is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WakeguardError::AudioDeviceBusy { .. } | WakeguardError::Recognition { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, WakeguardError>;
