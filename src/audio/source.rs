use crate::error::{Result, WakeguardError};
use std::collections::VecDeque;

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs replayed
/// file vs in-memory script).
pub trait AudioSource: Send {
    /// Acquire the device. Called once before the first read.
    fn open(&mut self) -> Result<()>;

    /// Fill `buffer` with 16-bit PCM samples.
    ///
    /// Blocks for at most an implementation-defined timeout. Returns the
    /// number of samples written; `0` means nothing arrived in time and is
    /// never end-of-stream.
    fn read(&mut self, buffer: &mut [i16]) -> Result<usize>;

    /// Release the device.
    fn close(&mut self) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// One step of a [`ScriptedAudioSource`].
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Samples(Vec<i16>),
    Underrun,
    Busy,
    Fail(String),
}

/// What a [`ScriptedAudioSource`] does after its script ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhenExhausted {
    /// Keep returning zero-length reads.
    #[default]
    Underrun,
    /// Keep returning silent frames.
    Silence,
    /// Fail with a closed stream.
    Close,
}

/// In-memory audio source for tests and benches
#[derive(Debug, Clone, Default)]
pub struct ScriptedAudioSource {
    script: VecDeque<ScriptedRead>,
    exhausted: WhenExhausted,
    is_open: bool,
    fail_open: Option<String>,
}

impl ScriptedAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a list of frames, read in order.
    pub fn with_frames(mut self, frames: Vec<Vec<i16>>) -> Self {
        self.script
            .extend(frames.into_iter().map(ScriptedRead::Samples));
        self
    }

    /// Queue an arbitrary read outcome.
    pub fn then(mut self, read: ScriptedRead) -> Self {
        self.script.push_back(read);
        self
    }

    /// Configure behaviour once the script is used up.
    pub fn when_exhausted(mut self, behaviour: WhenExhausted) -> Self {
        self.exhausted = behaviour;
        self
    }

    /// Configure the source to fail on open
    pub fn with_open_failure(mut self, message: &str) -> Self {
        self.fail_open = Some(message.to_string());
        self
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Reads still queued.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl AudioSource for ScriptedAudioSource {
    fn open(&mut self) -> Result<()> {
        if let Some(message) = &self.fail_open {
            return Err(WakeguardError::AudioDeviceNotFound {
                device: message.clone(),
            });
        }
        self.is_open = true;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if !self.is_open {
            return Err(WakeguardError::AudioStreamClosed);
        }

        let Some(step) = self.script.pop_front() else {
            return match self.exhausted {
                WhenExhausted::Underrun => Ok(0),
                WhenExhausted::Silence => {
                    buffer.fill(0);
                    Ok(buffer.len())
                }
                WhenExhausted::Close => Err(WakeguardError::AudioStreamClosed),
            };
        };

        match step {
            ScriptedRead::Samples(samples) => {
                let count = samples.len().min(buffer.len());
                buffer[..count].copy_from_slice(&samples[..count]);
                Ok(count)
            }
            ScriptedRead::Underrun => Ok(0),
            ScriptedRead::Busy => Err(WakeguardError::AudioDeviceBusy {
                message: "scripted busy device".to_string(),
            }),
            ScriptedRead::Fail(message) => Err(WakeguardError::AudioCapture { message }),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.is_open = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
