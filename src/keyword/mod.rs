//! Wake phrase detection and the capture that follows it.

pub mod machine;
pub mod session;
pub mod state;

pub use machine::{KeywordStateMachine, MachineConfig, strip_keyword};
pub use session::TranscriptionSession;
pub use state::KeywordState;
