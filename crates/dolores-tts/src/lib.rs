//! Streaming text-to-speech upstream abstraction for the Dolores voice
//! orchestrator.
//!
//! One [`TtsUpstream::synthesize`] call produces one raw PCM artifact for
//! one sentence; the serial-queue discipline and slot bookkeeping
//! live in the app crate's TTS Job Runner, not here.

pub mod error;
pub mod testing;
pub mod types;
pub mod upstream;

pub use error::{TtsError, TtsResult};
pub use types::TtsConfig;
pub use upstream::{HttpTtsUpstream, TtsUpstream};
