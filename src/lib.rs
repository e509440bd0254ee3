//! wakeguard - always-on wake phrase monitor
//!
//! Listens to an audio stream for a configured wake phrase, captures the
//! speech that follows until silence, and keeps itself alive with a stall
//! watchdog and bounded automatic restarts.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
#[cfg(feature = "cli")]
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod events;
pub mod keyword;
pub mod monitor;
pub mod pipeline;
pub mod recognition;
pub mod supervisor;

// Host-facing surface
pub use backend::{Backend, LiveBackend, SimulatedBackend};
pub use events::{EventSink, MonitorEvent};
pub use monitor::{Monitor, MonitorConfig, MonitorStatus};

// Collaborator contracts
pub use audio::source::AudioSource;
pub use audio::vad::VoiceActivityDetector;
pub use recognition::RecognitionEngine;

// Error handling
pub use error::{Result, WakeguardError};

// Config
pub use config::Config;
