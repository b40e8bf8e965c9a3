//! Streaming speech-to-text upstream abstraction for the Dolores voice
//! orchestrator.
//!
//! Wraps exactly one upstream streaming STT connection per session:
//! construction takes a factory trait ([`SttUpstream`]) and an upstream
//! configuration, [`SttSession`] handles lazy start, the startup lock, and
//! teardown, and upstream events arrive as [`SttEvent`] values on a channel.

pub mod error;
pub mod session;
pub mod testing;
pub mod types;
pub mod upstream;

pub use error::{SttError, SttResult};
pub use session::SttSession;
pub use types::{SttConfig, SttEvent};
pub use upstream::{SttConnection, SttUpstream, WebsocketSttUpstream};
