use std::fmt;

/// Current state of keyword monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeywordState {
    /// Pipeline built but not listening yet.
    Idle,
    /// Listening for the wake phrase.
    Armed,
    /// Wake phrase heard; a capture session is about to open.
    Detected,
    /// Capturing speech after the wake phrase.
    Transcribing,
    /// Silence ended the capture; the result is being delivered.
    Completing,
}

impl KeywordState {
    /// Whether a keyword/transcription cycle is in progress.
    pub fn is_capturing(self) -> bool {
        matches!(
            self,
            KeywordState::Detected | KeywordState::Transcribing | KeywordState::Completing
        )
    }
}

impl fmt::Display for KeywordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeywordState::Idle => "idle",
            KeywordState::Armed => "armed",
            KeywordState::Detected => "detected",
            KeywordState::Transcribing => "transcribing",
            KeywordState::Completing => "completing",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturing_states() {
        assert!(!KeywordState::Idle.is_capturing());
        assert!(!KeywordState::Armed.is_capturing());
        assert!(KeywordState::Detected.is_capturing());
        assert!(KeywordState::Transcribing.is_capturing());
        assert!(KeywordState::Completing.is_capturing());
    }

    #[test]
    fn test_display() {
        assert_eq!(KeywordState::Transcribing.to_string(), "transcribing");
    }
}
