//! Text accumulated during one capture session.

use std::time::Instant;

/// Buffer for the speech that follows a wake phrase.
///
/// Recognizers report partial results that grow while an utterance goes on.
/// A result extending the previous one replaces it; anything else starts a
/// new segment, so separate utterances are kept side by side.
#[derive(Debug, Clone)]
pub struct TranscriptionSession {
    segments: Vec<String>,
    last_result: String,
    last_audio_time: Instant,
    started: Instant,
    updates: u64,
}

impl TranscriptionSession {
    pub fn new(started: Instant) -> Self {
        Self {
            segments: Vec::new(),
            last_result: String::new(),
            last_audio_time: started,
            started,
            updates: 0,
        }
    }

    /// Apply a recognizer result. Returns `true` when the text changed.
    pub fn apply(&mut self, result: &str) -> bool {
        let result = result.trim();
        if result.is_empty() || result == self.last_result {
            return false;
        }

        match self.segments.last_mut() {
            Some(last) if result.starts_with(last.as_str()) => {
                *last = result.to_string();
            }
            _ => self.segments.push(result.to_string()),
        }

        self.last_result = result.to_string();
        self.updates += 1;
        true
    }

    /// Cumulative text of the session.
    pub fn text(&self) -> String {
        self.segments.join(" ")
    }

    /// Final text, trimmed.
    pub fn into_text(self) -> String {
        self.text().trim().to_string()
    }

    pub fn mark_audio(&mut self, at: Instant) {
        self.last_audio_time = at;
    }

    pub fn last_audio_time(&self) -> Instant {
        self.last_audio_time
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_session_is_empty() {
        let now = Instant::now();
        let session = TranscriptionSession::new(now);

        assert!(session.is_empty());
        assert_eq!(session.text(), "");
        assert_eq!(session.last_audio_time(), now);
        assert_eq!(session.started(), now);
    }

    #[test]
    fn test_growing_partial_replaces_segment() {
        let mut session = TranscriptionSession::new(Instant::now());

        assert!(session.apply("hola"));
        assert!(session.apply("hola mundo"));
        assert_eq!(session.text(), "hola mundo");
        assert_eq!(session.updates(), 2);
    }

    #[test]
    fn test_repeated_result_is_ignored() {
        let mut session = TranscriptionSession::new(Instant::now());

        assert!(session.apply("hola mundo"));
        assert!(!session.apply("hola mundo"));
        assert!(!session.apply("  hola mundo "));
        assert_eq!(session.updates(), 1);
    }

    #[test]
    fn test_unrelated_result_starts_new_segment() {
        let mut session = TranscriptionSession::new(Instant::now());

        session.apply("turn on");
        session.apply("the lights");
        assert_eq!(session.text(), "turn on the lights");
    }

    #[test]
    fn test_empty_result_is_ignored() {
        let mut session = TranscriptionSession::new(Instant::now());
        assert!(!session.apply("   "));
        assert!(session.is_empty());
    }

    #[test]
    fn test_mark_audio_moves_last_audio_time() {
        let start = Instant::now();
        let mut session = TranscriptionSession::new(start);
        session.mark_audio(start + Duration::from_millis(300));
        assert_eq!(session.last_audio_time() - start, Duration::from_millis(300));
    }

    #[test]
    fn test_into_text_trims() {
        let mut session = TranscriptionSession::new(Instant::now());
        session.apply("hola mundo");
        assert_eq!(session.into_text(), "hola mundo");
    }
}
