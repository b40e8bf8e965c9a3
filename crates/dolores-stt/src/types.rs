//! Wire-level types for one streaming STT upstream session.

use std::time::Duration;

use dolores_foundation::error::SttError;

/// Events raised by an STT upstream connection.
///
/// Collapses the three transcript callbacks (interim, final, utterance-end)
/// into a single enum posted to the session actor, plus `Error`/`Closed`
/// for the failure and disconnect paths. `Error` carries the typed
/// `SttError` (not a bare string) so the Controller can classify it via
/// [`SttError::is_transient`] instead of string-matching.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A non-final partial transcript; does not advance the utterance buffer.
    Interim(String),
    /// A finalized segment, appended to the accumulating utterance buffer.
    Final(String),
    /// The upstream's silence-based endpointing fired; carries the full
    /// accumulated transcript for the utterance and resets the buffer.
    UtteranceEnd(String),
    /// A transient or fatal upstream error.
    Error(SttError),
    /// The upstream connection closed (gracefully or otherwise).
    Closed,
}

/// Upstream configuration, fixed by the provider's protocol contract:
/// PCM S16LE, 16 kHz, mono, Dutch, interim results on, smart formatting on.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub credential: String,
    pub endpoint: String,
    pub language: String,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub interim_results: bool,
    pub smart_format: bool,
    /// Silence duration that ends a speech segment (endpointing).
    pub endpointing: Duration,
    /// Silence duration that ends the whole utterance.
    pub utterance_end_timeout: Duration,
    pub start_timeout: Duration,
}

impl SttConfig {
    pub fn new(credential: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            endpoint: endpoint.into(),
            language: "nl".to_string(),
            sample_rate_hz: 16_000,
            channels: 1,
            interim_results: true,
            smart_format: true,
            endpointing: Duration::from_millis(500),
            utterance_end_timeout: Duration::from_millis(1500),
            start_timeout: Duration::from_secs(10),
        }
    }
}
