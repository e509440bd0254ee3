use crate::defaults;
use crate::error::{Result, WakeguardError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub keyword: KeywordConfig,
    pub audio: AudioConfig,
    pub vad: ActivityConfig,
    pub transcription: TranscriptionConfig,
    pub watchdog: WatchdogConfig,
    pub restart: RestartConfig,
    pub backend: BackendConfig,
}

/// Wake phrase configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeywordConfig {
    pub phrase: String,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_size: usize,
    pub read_timeout_ms: u64,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivityConfig {
    pub speech_threshold: f32,
}

/// Capture session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub silence_threshold_ms: u64,
}

/// Liveness watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_ms: u64,
    pub stall_ms: u64,
}

/// Restart policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RestartConfig {
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    /// `None` keeps restarting forever.
    pub max_restarts: Option<u64>,
    /// `0` disables the unconditional periodic restart.
    pub scheduled_interval_ms: u64,
}

/// Capture and recognition backend selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// WAV file replayed by the simulated backend (silence when unset).
    pub wav: Option<PathBuf>,
    /// Phrase script file for the simulated recognizer, one phrase per line.
    pub script: Option<PathBuf>,
    /// Inline phrases, used when no script file is given.
    pub phrases: Vec<String>,
    /// Whisper model used by the live backend.
    pub model: Option<PathBuf>,
    pub language: String,
}

/// Backend enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Replayed audio and scripted recognition.
    #[default]
    Simulated,
    /// Microphone capture and Whisper recognition.
    Live,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            phrase: defaults::KEYWORD.to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            read_timeout_ms: defaults::READ_TIMEOUT_MS,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::SPEECH_THRESHOLD,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: defaults::SILENCE_THRESHOLD_MS,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: defaults::WATCHDOG_INTERVAL_MS,
            stall_ms: defaults::WATCHDOG_STALL_MS,
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            delay_ms: defaults::RESTART_DELAY_MS,
            max_delay_ms: defaults::RESTART_MAX_DELAY_MS,
            max_restarts: None,
            scheduled_interval_ms: defaults::SCHEDULED_RESTART_INTERVAL_MS,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Simulated,
            wav: None,
            script: None,
            phrases: Vec::new(),
            model: None,
            language: "auto".to_string(),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Simulated => write!(f, "simulated"),
            BackendKind::Live => write!(f, "live"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - WAKEGUARD_KEYWORD → keyword.phrase
    /// - WAKEGUARD_AUDIO_DEVICE → audio.device
    /// - WAKEGUARD_MODEL → backend.model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(keyword) = std::env::var("WAKEGUARD_KEYWORD")
            && !keyword.trim().is_empty()
        {
            self.keyword.phrase = keyword;
        }

        if let Ok(device) = std::env::var("WAKEGUARD_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(model) = std::env::var("WAKEGUARD_MODEL")
            && !model.is_empty()
        {
            self.backend.model = Some(PathBuf::from(model));
        }

        self
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.keyword.phrase.trim().is_empty() {
            return Err(invalid("keyword.phrase", "must not be empty"));
        }
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.frame_size == 0 {
            return Err(invalid("audio.frame_size", "must be positive"));
        }
        if !self.vad.speech_threshold.is_finite() || self.vad.speech_threshold < 0.0 {
            return Err(invalid(
                "vad.speech_threshold",
                "must be a non-negative number",
            ));
        }
        if self.watchdog.interval_ms == 0 {
            return Err(invalid("watchdog.interval_ms", "must be positive"));
        }
        if self.watchdog.stall_ms < self.watchdog.interval_ms {
            return Err(invalid(
                "watchdog.stall_ms",
                "must be at least watchdog.interval_ms",
            ));
        }
        if self.restart.max_delay_ms < self.restart.delay_ms {
            return Err(invalid(
                "restart.max_delay_ms",
                "must be at least restart.delay_ms",
            ));
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/wakeguard/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(defaults::APP_DIR).join("config.toml"))
    }
}

fn invalid(key: &str, message: &str) -> WakeguardError {
    WakeguardError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_wakeguard_env() {
        remove_env("WAKEGUARD_KEYWORD");
        remove_env("WAKEGUARD_AUDIO_DEVICE");
        remove_env("WAKEGUARD_MODEL");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.keyword.phrase, "minerva");
        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_size, 1024);
        assert_eq!(config.vad.speech_threshold, 500.0);
        assert_eq!(config.transcription.silence_threshold_ms, 2000);
        assert_eq!(config.watchdog.interval_ms, 10_000);
        assert_eq!(config.watchdog.stall_ms, 60_000);
        assert_eq!(config.restart.scheduled_interval_ms, 300_000);
        assert_eq!(config.restart.max_restarts, None);
        assert_eq!(config.backend.kind, BackendKind::Simulated);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [keyword]
            phrase = "Jarvis"

            [audio]
            device = "hw:0,0"
            frame_size = 512

            [vad]
            speech_threshold = 750.0

            [transcription]
            silence_threshold_ms = 1500

            [watchdog]
            interval_ms = 5000
            stall_ms = 30000

            [restart]
            max_restarts = 10
            scheduled_interval_ms = 0

            [backend]
            kind = "live"
            model = "/models/ggml-base.bin"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.keyword.phrase, "Jarvis");
        assert_eq!(config.audio.device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.frame_size, 512);
        assert_eq!(config.vad.speech_threshold, 750.0);
        assert_eq!(config.transcription.silence_threshold_ms, 1500);
        assert_eq!(config.watchdog.interval_ms, 5000);
        assert_eq!(config.watchdog.stall_ms, 30000);
        assert_eq!(config.restart.max_restarts, Some(10));
        assert_eq!(config.restart.scheduled_interval_ms, 0);
        assert_eq!(config.backend.kind, BackendKind::Live);
        assert_eq!(
            config.backend.model,
            Some(PathBuf::from("/models/ggml-base.bin"))
        );
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [keyword]
            phrase = "computer"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.keyword.phrase, "computer");
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.watchdog, WatchdogConfig::default());
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn test_env_override_keyword() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_wakeguard_env();

        set_env("WAKEGUARD_KEYWORD", "hey box");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.keyword.phrase, "hey box");
        assert_eq!(config.audio.device, None);

        clear_wakeguard_env();
    }

    #[test]
    fn test_env_override_device_and_model() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_wakeguard_env();

        set_env("WAKEGUARD_AUDIO_DEVICE", "pulse");
        set_env("WAKEGUARD_MODEL", "/tmp/ggml-tiny.bin");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.device, Some("pulse".to_string()));
        assert_eq!(
            config.backend.model,
            Some(PathBuf::from("/tmp/ggml-tiny.bin"))
        );

        clear_wakeguard_env();
    }

    #[test]
    fn test_env_override_blank_keyword_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_wakeguard_env();

        set_env("WAKEGUARD_KEYWORD", "   ");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.keyword.phrase, "minerva");

        clear_wakeguard_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[audio\nframe_size = ").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_wakeguard_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[keyword\nphrase = \"broken").unwrap();

        let err = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_keyword() {
        let mut config = Config::default();
        config.keyword.phrase = "  ".to_string();

        match config.validate() {
            Err(WakeguardError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "keyword.phrase");
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_stall_shorter_than_interval() {
        let mut config = Config::default();
        config.watchdog.interval_ms = 10_000;
        config.watchdog.stall_ms = 5_000;

        match config.validate() {
            Err(WakeguardError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "watchdog.stall_ms");
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_frame_size() {
        let mut config = Config::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_values() {
        let mut config = Config::default();
        config.keyword.phrase = "athena".to_string();
        config.restart.max_restarts = Some(3);

        let rendered = config.to_toml_string().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Some(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("wakeguard"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}
