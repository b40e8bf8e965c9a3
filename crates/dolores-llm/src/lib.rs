//! Streaming LLM upstream abstraction for the Dolores voice orchestrator.
//!
//! Follows the same trait + error + types shape as `dolores-stt` and
//! `dolores-tts`: one streaming request yields a lazy, cancellable
//! sequence of text deltas.

pub mod error;
pub mod streamer;
pub mod testing;
pub mod types;

pub use error::{LlmError, LlmResult};
pub use streamer::{LlmStreamHandle, LlmUpstream, SseLlmUpstream};
pub use types::{LlmConfig, SYSTEM_PROMPT};
