//! Command-line interface for wakeguard
//!
//! Provides argument parsing using clap derive macros.

use crate::config::{BackendKind, Config};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Always-on wake phrase monitor
#[derive(Parser, Debug)]
#[command(name = "wakeguard", version, about = "Always-on wake phrase monitor")]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print transcriptions
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: per-frame trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Wake phrase to listen for
    #[arg(long, short = 'k', value_name = "PHRASE")]
    pub keyword: Option<String>,

    /// Audio input device (e.g., pipewire)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Capture and recognition backend
    #[arg(long, value_enum, value_name = "BACKEND")]
    pub backend: Option<BackendArg>,

    /// WAV file replayed by the simulated backend
    #[arg(long, value_name = "FILE")]
    pub wav: Option<PathBuf>,

    /// Phrase script for the simulated recognizer
    #[arg(long, value_name = "FILE")]
    pub script: Option<PathBuf>,

    /// Whisper model file for the live backend
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Silence that ends a capture. Examples: 2s, 1500ms
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub silence: Option<Duration>,

    /// Time without progress before the watchdog restarts. Examples: 60s, 2m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub stall: Option<Duration>,

    /// Period of the unconditional restart, 0 disables. Examples: 5m, 1h
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub scheduled_restart: Option<Duration>,

    /// Give up after this many consecutive failed restarts
    #[arg(long, value_name = "N")]
    pub max_restarts: Option<u64>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    pub json: bool,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `1500ms`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Backend names accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendArg {
    Simulated,
    Live,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Simulated => BackendKind::Simulated,
            BackendArg::Live => BackendKind::Live,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor for the wake phrase until interrupted
    Run,

    /// List available audio input devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration inspection actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(keyword) = &self.keyword {
            config.keyword.phrase = keyword.clone();
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(backend) = self.backend {
            config.backend.kind = backend.into();
        }
        if let Some(wav) = &self.wav {
            config.backend.wav = Some(wav.clone());
        }
        if let Some(script) = &self.script {
            config.backend.script = Some(script.clone());
        }
        if let Some(model) = &self.model {
            config.backend.model = Some(model.clone());
        }
        if let Some(silence) = self.silence {
            config.transcription.silence_threshold_ms = silence.as_millis() as u64;
        }
        if let Some(stall) = self.stall {
            config.watchdog.stall_ms = stall.as_millis() as u64;
        }
        if let Some(period) = self.scheduled_restart {
            config.restart.scheduled_interval_ms = period.as_millis() as u64;
        }
        if let Some(max) = self.max_restarts {
            config.restart.max_restarts = Some(max);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["wakeguard"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.keyword.is_none());
        assert!(cli.device.is_none());
        assert!(cli.backend.is_none());
        assert!(!cli.json);
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["wakeguard", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "wakeguard",
            "run",
            "--keyword",
            "jarvis",
            "--backend",
            "live",
            "--silence",
            "1500ms",
            "--stall",
            "90",
        ])
        .unwrap();

        assert!(matches!(cli.command, Some(Commands::Run)));
        assert_eq!(cli.keyword.as_deref(), Some("jarvis"));
        assert_eq!(cli.backend, Some(BackendArg::Live));
        assert_eq!(cli.silence, Some(Duration::from_millis(1500)));
        assert_eq!(cli.stall, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_devices() {
        let cli = Cli::try_parse_from(["wakeguard", "devices"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Devices)));
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["wakeguard", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));
    }

    #[test]
    fn test_global_options_after_command() {
        let cli =
            Cli::try_parse_from(["wakeguard", "devices", "--config", "/tmp/config.toml", "-q"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert!(cli.quiet);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = Cli::try_parse_from(["wakeguard", "--silence", "soon"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_invalid_command_returns_error() {
        let err = Cli::try_parse_from(["wakeguard", "invalid"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["wakeguard", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m30s"), Ok(Duration::from_secs(150)));
        assert_eq!(parse_duration(" 5m "), Ok(Duration::from_secs(300)));
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "wakeguard",
            "--keyword",
            "jarvis",
            "--device",
            "pipewire",
            "--backend",
            "live",
            "--model",
            "/models/ggml-base.bin",
            "--scheduled-restart",
            "0",
            "--max-restarts",
            "5",
        ])
        .unwrap();

        let config = cli.apply_overrides(Config::default());
        assert_eq!(config.keyword.phrase, "jarvis");
        assert_eq!(config.audio.device.as_deref(), Some("pipewire"));
        assert_eq!(config.backend.kind, BackendKind::Live);
        assert_eq!(
            config.backend.model,
            Some(PathBuf::from("/models/ggml-base.bin"))
        );
        assert_eq!(config.restart.scheduled_interval_ms, 0);
        assert_eq!(config.restart.max_restarts, Some(5));
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = Cli::try_parse_from(["wakeguard"]).unwrap();
        assert_eq!(cli.apply_overrides(Config::default()), Config::default());
    }
}
