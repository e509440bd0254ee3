//! Default configuration constants for wakeguard.
//!
//! Shared by the TOML configuration, the typed monitor configuration and the
//! CLI so every entry point agrees on the same baseline.

/// Default wake phrase, matched case-insensitively.
pub const KEYWORD: &str = "minerva";

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition.
pub const SAMPLE_RATE: u32 = 16000;

/// Default number of samples per frame (64ms at 16kHz).
pub const FRAME_SIZE: usize = 1024;

/// Default upper bound for one blocking device read, in milliseconds.
pub const READ_TIMEOUT_MS: u64 = 500;

/// Default speech threshold on the mean absolute amplitude of a frame.
///
/// Measured on the raw 16-bit PCM scale (0 to 32768), not normalized.
pub const SPEECH_THRESHOLD: f32 = 500.0;

/// Default silence that ends a capture session, in milliseconds.
pub const SILENCE_THRESHOLD_MS: u64 = 2000;

/// Default period of the liveness check, in milliseconds.
pub const WATCHDOG_INTERVAL_MS: u64 = 10_000;

/// Default time without processed frames before the pipeline counts as stalled.
pub const WATCHDOG_STALL_MS: u64 = 60_000;

/// Default delay before a requested restart rebuilds the pipeline.
pub const RESTART_DELAY_MS: u64 = 1500;

/// Upper bound for the exponential restart backoff.
pub const RESTART_MAX_DELAY_MS: u64 = 60_000;

/// Default period of the unconditional restart (5 minutes).
pub const SCHEDULED_RESTART_INTERVAL_MS: u64 = 300_000;

/// Sleep between reads when the device returned no samples.
pub const UNDERRUN_POLL_MS: u64 = 16;

/// Capacity of the channel carrying control commands into the processing loop.
pub const CONTROL_BUFFER: usize = 16;

/// How long a rebuild waits for the old processing loop to exit.
pub const TEARDOWN_TIMEOUT_MS: u64 = 3000;

/// Application directory name used under the XDG config directory.
pub const APP_DIR: &str = "wakeguard";
