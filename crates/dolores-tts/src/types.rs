//! Configuration for one streaming TTS upstream.

use std::time::Duration;

/// Output format is fixed: raw PCM S16LE, 16 kHz, mono. Only
/// the voice, credential, and language are configurable.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub credential: String,
    pub endpoint: String,
    pub voice_id: String,
    pub language: String,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub request_timeout: Duration,
}

impl TtsConfig {
    pub fn new(
        credential: impl Into<String>,
        endpoint: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            credential: credential.into(),
            endpoint: endpoint.into(),
            voice_id: voice_id.into(),
            language: "nl".to_string(),
            sample_rate_hz: 16_000,
            channels: 1,
            request_timeout: Duration::from_secs(30),
        }
    }
}
