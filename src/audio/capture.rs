//! Live microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::source::AudioSource;
use crate::error::{Result, WakeguardError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Chunks buffered between the device callback and `read`.
const CALLBACK_QUEUE: usize = 64;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never microphones.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List usable audio input devices, marking preferred ones with "\[recommended\]".
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| WakeguardError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| WakeguardError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
            })?;

        match device_name {
            Some(name) => devices
                .into_iter()
                .find(|dev| dev.name().is_ok_and(|dev_name| dev_name == name))
                .ok_or_else(|| WakeguardError::AudioDeviceNotFound {
                    device: name.to_string(),
                }),
            None => {
                let mut devices = devices;
                if let Some(preferred) =
                    devices.find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
                {
                    return Ok(preferred);
                }
                host.default_input_device()
                    .ok_or_else(|| WakeguardError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    })
            }
        }
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is owned by a single `CpalAudioSource`, which is only
/// driven from the processing thread.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// State shared with the device callbacks of one stream.
#[derive(Clone)]
struct CallbackShared {
    sender: Sender<Vec<i16>>,
    callbacks: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
}

impl CallbackShared {
    fn push(&self, samples: Vec<i16>) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if self.sender.try_send(samples).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn fail(&self, message: String) {
        tracing::error!(%message, "audio stream error");
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(message);
        }
    }
}

/// Microphone capture producing 16kHz mono `i16` frames.
///
/// Tries the preferred format first (i16 at the target rate, mono), then
/// falls back to the device's default config with software conversion.
pub struct CpalAudioSource {
    device: cpal::Device,
    sample_rate: u32,
    read_timeout: Duration,
    stream: Option<SendableStream>,
    receiver: Option<Receiver<Vec<i16>>>,
    shared: Option<CallbackShared>,
    pending: VecDeque<i16>,
}

impl CpalAudioSource {
    /// Create a source for the named input device, or the best default.
    pub fn new(device_name: Option<&str>, sample_rate: u32, read_timeout: Duration) -> Result<Self> {
        let device = find_device(device_name)?;
        if let Ok(name) = device.name() {
            tracing::info!(device = %name, sample_rate, "selected input device");
        }

        Ok(Self {
            device,
            sample_rate,
            read_timeout,
            stream: None,
            receiver: None,
            shared: None,
            pending: VecDeque::new(),
        })
    }

    /// Chunks the callback had to drop because `read` fell behind.
    pub fn dropped_chunks(&self) -> u64 {
        self.shared
            .as_ref()
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn build_with<T, F>(
        &self,
        config: &cpal::StreamConfig,
        shared: &CallbackShared,
        convert: F,
    ) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::SizedSample,
        F: Fn(&[T]) -> Vec<i16> + Send + 'static,
    {
        let data_shared = shared.clone();
        let error_shared = shared.clone();
        self.device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| data_shared.push(convert(data)),
            move |err| error_shared.fail(err.to_string()),
            None,
        )
    }

    /// Try i16 then f32 at the target rate in mono.
    fn build_preferred(&self, shared: &CallbackShared) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        if let Ok(stream) = self.build_with(&preferred_config, shared, |data: &[i16]| data.to_vec())
        {
            return Ok(stream);
        }

        if let Ok(stream) = self.build_with(&preferred_config, shared, |data: &[f32]| {
            data.iter().map(|&s| f32_to_i16(s)).collect()
        }) {
            return Ok(stream);
        }

        self.build_native(shared)
    }

    /// Capture at the device's native config, converting in software.
    fn build_native(&self, shared: &CallbackShared) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| WakeguardError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native audio format, converting in software"
        );

        let built = match default_config.sample_format() {
            SampleFormat::I16 => self.build_with(&stream_config, shared, move |data: &[i16]| {
                convert_to_mono(data, native_channels, native_rate, target_rate)
            }),
            SampleFormat::F32 => self.build_with(&stream_config, shared, move |data: &[f32]| {
                let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                convert_to_mono(&i16_data, native_channels, native_rate, target_rate)
            }),
            fmt => {
                return Err(WakeguardError::AudioCapture {
                    message: format!(
                        "Unsupported native sample format: {:?}. \
                         Try specifying a device with --device.",
                        fmt
                    ),
                });
            }
        };

        built.map_err(|e| WakeguardError::AudioCapture {
            message: format!("Failed to build native stream: {}", e),
        })
    }

    fn new_shared(&mut self) -> CallbackShared {
        let (sender, receiver) = crossbeam_channel::bounded(CALLBACK_QUEUE);
        self.receiver = Some(receiver);
        self.pending.clear();
        let shared = CallbackShared {
            sender,
            callbacks: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            failure: Arc::new(Mutex::new(None)),
        };
        self.shared = Some(shared.clone());
        shared
    }

    fn stream_failure(&self) -> Option<String> {
        self.shared
            .as_ref()
            .and_then(|s| s.failure.lock().ok().and_then(|f| f.clone()))
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn convert_to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    crate::audio::wav::resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let shared = self.new_shared();
        let stream = self.build_preferred(&shared)?;
        stream.play().map_err(|e| WakeguardError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
        std::thread::sleep(Duration::from_millis(200));

        let stream = if shared.callbacks.load(Ordering::Relaxed) == 0 {
            drop(stream);
            tracing::warn!("preferred stream delivered no audio, retrying with native format");
            let shared = self.new_shared();
            let native = self.build_native(&shared)?;
            native.play().map_err(|e| WakeguardError::AudioCapture {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn read(&mut self, buffer: &mut [i16]) -> Result<usize> {
        if let Some(message) = self.stream_failure() {
            return Err(WakeguardError::AudioCapture { message });
        }
        let Some(receiver) = &self.receiver else {
            return Err(WakeguardError::AudioStreamClosed);
        };

        let deadline = Instant::now() + self.read_timeout;
        while self.pending.len() < buffer.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WakeguardError::AudioStreamClosed);
                }
            }
        }

        if self.pending.len() < buffer.len() {
            return Ok(0);
        }
        for (slot, sample) in buffer.iter_mut().zip(self.pending.drain(..buffer.len())) {
            *slot = sample;
        }
        Ok(buffer.len())
    }

    fn close(&mut self) -> Result<()> {
        let dropped = self.dropped_chunks();
        if dropped > 0 {
            tracing::debug!(dropped, "audio chunks dropped while reading fell behind");
        }
        self.receiver = None;
        self.pending.clear();
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| WakeguardError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}
