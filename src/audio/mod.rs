//! Audio ingestion: device sources and voice activity detection.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod source;
pub mod vad;
pub mod wav;

pub use source::{AudioSource, ScriptedAudioSource, ScriptedRead, WhenExhausted};
pub use vad::{ActivityLevelDetector, VadConfig, VoiceActivityDetector};
pub use wav::WavAudioSource;
