//! Per-frame processing outcomes.

use crate::error::WakeguardError;
use std::fmt;

/// Errors that can occur while processing one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// Recoverable error that allows the loop to continue processing.
    Recoverable(String),
    /// Fatal error that requires the pipeline to be rebuilt.
    Fatal(String),
}

impl ProcessingError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessingError::Fatal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProcessingError::Recoverable(msg) | ProcessingError::Fatal(msg) => msg,
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            ProcessingError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for ProcessingError {}

impl From<WakeguardError> for ProcessingError {
    fn from(error: WakeguardError) -> Self {
        if error.is_fatal() {
            ProcessingError::Fatal(error.to_string())
        } else {
            ProcessingError::Recoverable(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_display() {
        let recoverable = ProcessingError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = ProcessingError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
    }

    #[test]
    fn test_from_recognition_error_is_recoverable() {
        let error: ProcessingError = WakeguardError::Recognition {
            message: "bad chunk".to_string(),
        }
        .into();
        assert!(!error.is_fatal());
        assert_eq!(error.message(), "Recognition failed: bad chunk");
    }

    #[test]
    fn test_from_stream_closed_is_fatal() {
        let error: ProcessingError = WakeguardError::AudioStreamClosed.into();
        assert!(error.is_fatal());
    }
}
