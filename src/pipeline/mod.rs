//! Frame processing for one pipeline instance.
//!
//! A single thread reads frames from the [`AudioSource`](crate::audio::AudioSource),
//! classifies them and feeds the keyword state machine. Commands reach the
//! loop over a bounded crossbeam channel.

pub mod error;
pub mod processor;
pub mod types;

pub use error::ProcessingError;
pub use processor::{ControlCommand, FatalHandler, Pipeline, PipelineHandle, ProcessorConfig};
pub use types::{AudioFrame, VadFrame};
