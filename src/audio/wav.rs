//! WAV file audio source for simulated capture.
//!
//! Replays a recording as if it came from a microphone: frames are handed
//! out at real-time pace and the file loops, so the processing loop sees a
//! device that never ends.

use crate::audio::source::AudioSource;
use crate::error::{Result, WakeguardError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};

/// Audio source that replays WAV data.
/// Supports arbitrary sample rates and channels, resampling to the target rate mono.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    looping: bool,
    paced: bool,
    started: Option<Instant>,
    delivered: u64,
}

impl WavAudioSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: impl Read, sample_rate: u32) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader).map_err(|e| WakeguardError::AudioCapture {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels.max(1) as usize;

        let raw_samples: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => wav_reader
                .into_samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Float => wav_reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<std::result::Result<Vec<_>, _>>(),
        }
        .map_err(|e| WakeguardError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono_samples = downmix(&raw_samples, source_channels);
        let samples = resample(&mono_samples, source_rate, sample_rate);

        tracing::debug!(
            source_rate,
            channels = source_channels,
            samples = samples.len(),
            "decoded WAV replay source"
        );

        Ok(Self::from_samples(samples, sample_rate))
    }

    /// Open a WAV file from disk.
    pub fn from_path(path: &Path, sample_rate: u32) -> Result<Self> {
        let file = File::open(path).map_err(|e| WakeguardError::AudioDeviceNotFound {
            device: format!("{}: {}", path.display(), e),
        })?;
        Self::from_reader(BufReader::new(file), sample_rate)
    }

    /// Replay already decoded mono samples.
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            position: 0,
            sample_rate,
            looping: true,
            paced: true,
            started: None,
            delivered: 0,
        }
    }

    /// A source that produces nothing but silence.
    pub fn silence(sample_rate: u32) -> Self {
        Self::from_samples(Vec::new(), sample_rate)
    }

    /// Stop after one pass instead of looping. Further reads return 0.
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    /// Hand out frames as fast as they are read.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Number of decoded samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn pace(&mut self, count: usize) {
        if !self.paced || self.sample_rate == 0 {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        self.delivered += count as u64;
        let due = started + Duration::from_micros(self.delivered * 1_000_000 / self.sample_rate as u64);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }
}

impl AudioSource for WavAudioSource {
    fn open(&mut self) -> Result<()> {
        self.position = 0;
        self.started = None;
        self.delivered = 0;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }

        if self.samples.is_empty() {
            buffer.fill(0);
            self.pace(buffer.len());
            return Ok(buffer.len());
        }

        let mut written = 0;
        while written < buffer.len() {
            if self.position >= self.samples.len() {
                if !self.looping {
                    break;
                }
                self.position = 0;
            }
            let take = (buffer.len() - written).min(self.samples.len() - self.position);
            buffer[written..written + take]
                .copy_from_slice(&self.samples[self.position..self.position + take]);
            self.position += take;
            written += take;
        }

        self.pace(written);
        Ok(written)
    }

    fn close(&mut self) -> Result<()> {
        self.started = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}

/// Average interleaved channels into mono.
fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
