//! Voice Activity Detection (VAD) module.
//!
//! Classifies frames as speech or silence from their energy. The keyword
//! state machine only sees the resulting `(level, is_speech)` pair, so a
//! spectral or model-based detector can replace [`ActivityLevelDetector`]
//! behind the [`VoiceActivityDetector`] trait.

use crate::defaults;
use crate::pipeline::types::{AudioFrame, VadFrame};

/// Scores frames and decides whether they contain speech.
pub trait VoiceActivityDetector: Send {
    /// Activity level of a frame. Higher means louder.
    fn score(&self, samples: &[i16]) -> f32;

    /// Whether a level counts as speech.
    fn is_speech(&self, level: f32) -> bool;

    /// Annotate a frame with its level and speech flag.
    fn classify(&self, frame: AudioFrame) -> VadFrame {
        let level = self.score(&frame.samples);
        let is_speech = self.is_speech(level);
        VadFrame::new(frame, level, is_speech)
    }
}

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Mean absolute amplitude above which a frame is speech (16-bit PCM scale).
    pub speech_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::SPEECH_THRESHOLD,
        }
    }
}

/// Energy detector using the mean absolute amplitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityLevelDetector {
    config: VadConfig,
}

impl ActivityLevelDetector {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f32 {
        self.config.speech_threshold
    }

    /// Updates the speech threshold.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.speech_threshold = threshold;
    }
}

impl VoiceActivityDetector for ActivityLevelDetector {
    fn score(&self, samples: &[i16]) -> f32 {
        mean_absolute_amplitude(samples)
    }

    fn is_speech(&self, level: f32) -> bool {
        level > self.config.speech_threshold
    }
}

/// Mean absolute sample magnitude on the raw 16-bit scale.
///
/// Returns 0.0 for an empty frame. `i16::MIN` counts as 32768.
pub fn mean_absolute_amplitude(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: u64 = samples
        .iter()
        .map(|&sample| (sample as i32).unsigned_abs() as u64)
        .sum();

    (sum as f64 / samples.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn make_silence(count: usize) -> Vec<i16> {
        vec![0i16; count]
    }

    fn make_speech(count: usize, amplitude: i16) -> Vec<i16> {
        vec![amplitude; count]
    }

    #[test]
    fn test_level_of_silence_is_zero() {
        assert_eq!(mean_absolute_amplitude(&make_silence(1024)), 0.0);
    }

    #[test]
    fn test_level_of_empty_frame_is_zero() {
        assert_eq!(mean_absolute_amplitude(&[]), 0.0);
    }

    #[test]
    fn test_level_is_mean_of_magnitudes() {
        let mut mixed = make_speech(512, 1000);
        mixed.extend(make_speech(512, -3000));
        assert_eq!(mean_absolute_amplitude(&mixed), 2000.0);
    }

    #[test]
    fn test_level_handles_i16_min() {
        let level = mean_absolute_amplitude(&make_speech(4, i16::MIN));
        assert_eq!(level, 32768.0);
    }

    #[test]
    fn test_default_threshold() {
        let detector = ActivityLevelDetector::default();
        assert_eq!(detector.threshold(), 500.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let detector = ActivityLevelDetector::default();
        assert!(!detector.is_speech(500.0));
        assert!(detector.is_speech(500.5));
        assert!(!detector.is_speech(0.0));
    }

    #[test]
    fn test_classify_marks_speech() {
        let detector = ActivityLevelDetector::default();
        let frame = AudioFrame::new(make_speech(1024, 3000), Instant::now(), 7);

        let vad = detector.classify(frame);
        assert!(vad.is_speech);
        assert_eq!(vad.level, 3000.0);
        assert_eq!(vad.frame.sequence, 7);
    }

    #[test]
    fn test_classify_marks_silence() {
        let detector = ActivityLevelDetector::default();
        let frame = AudioFrame::new(make_speech(1024, 120), Instant::now(), 0);

        let vad = detector.classify(frame);
        assert!(!vad.is_speech);
    }

    #[test]
    fn test_set_threshold() {
        let mut detector = ActivityLevelDetector::new(VadConfig {
            speech_threshold: 100.0,
        });
        assert!(detector.is_speech(200.0));
        detector.set_threshold(300.0);
        assert!(!detector.is_speech(200.0));
    }
}
