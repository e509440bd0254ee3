//! Data types for the processing loop.

use std::time::Instant;

/// A frame of raw audio samples with timing information.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Timestamp when this frame was read from the device.
    pub timestamp: Instant,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(samples: Vec<i16>, timestamp: Instant, sequence: u64) -> Self {
        Self {
            samples,
            timestamp,
            sequence,
        }
    }

    /// Duration of the frame at the given sample rate, in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        if sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / sample_rate as u64
    }
}

/// An audio frame with voice activity detection results.
#[derive(Debug, Clone)]
pub struct VadFrame {
    pub frame: AudioFrame,
    /// Mean absolute amplitude of the frame.
    pub level: f32,
    /// Whether speech was detected in this frame.
    pub is_speech: bool,
}

impl VadFrame {
    /// Creates a new VAD frame.
    pub fn new(frame: AudioFrame, level: f32, is_speech: bool) -> Self {
        Self {
            frame,
            level,
            is_speech,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.frame.samples
    }

    pub fn timestamp(&self) -> Instant {
        self.frame.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_creation() {
        let samples = vec![1, 2, 3, 4, 5];
        let timestamp = Instant::now();
        let frame = AudioFrame::new(samples.clone(), timestamp, 42);

        assert_eq!(frame.samples, samples);
        assert_eq!(frame.timestamp, timestamp);
        assert_eq!(frame.sequence, 42);
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::new(vec![0; 1024], Instant::now(), 0);
        assert_eq!(frame.duration_ms(16000), 64);
        assert_eq!(frame.duration_ms(0), 0);
    }

    #[test]
    fn test_vad_frame_accessors() {
        let timestamp = Instant::now();
        let frame = AudioFrame::new(vec![10, 20, 30], timestamp, 3);
        let vad = VadFrame::new(frame, 20.0, false);

        assert_eq!(vad.samples(), &[10, 20, 30]);
        assert_eq!(vad.timestamp(), timestamp);
        assert_eq!(vad.sequence(), 3);
        assert!(!vad.is_speech);
        assert_eq!(vad.level, 20.0);
    }
}
