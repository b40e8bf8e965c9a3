//! The streaming TTS upstream trait and its HTTP realization.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::TtsResult;
use crate::types::TtsConfig;
use dolores_foundation::error::TtsError;

/// One synthesis call: a sentence in, a raw PCM S16LE / 16 kHz / mono
/// artifact out. Implementations are stateless and shared across
/// sessions; the serial dispatch discipline lives in the TTS Job Runner,
/// not here.
#[async_trait]
pub trait TtsUpstream: Send + Sync {
    async fn synthesize(&self, config: &TtsConfig, text: &str) -> TtsResult<Vec<u8>>;
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    language: &'a str,
    output_format: &'a str,
    sample_rate: u32,
}

/// Real upstream: one POST per sentence, requesting raw PCM so no decode
/// step is needed before the artifact reaches the Ordered Audio Emitter.
pub struct HttpTtsUpstream {
    client: reqwest::Client,
}

impl HttpTtsUpstream {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTtsUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsUpstream for HttpTtsUpstream {
    async fn synthesize(&self, config: &TtsConfig, text: &str) -> TtsResult<Vec<u8>> {
        let body = SynthesizeRequest {
            text,
            voice_id: &config.voice_id,
            language: &config.language,
            output_format: "pcm_s16le",
            sample_rate: config.sample_rate_hz,
        };

        let response = tokio::time::timeout(
            config.request_timeout,
            self.client
                .post(&config.endpoint)
                .bearer_auth(&config.credential)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| TtsError::Timeout(config.request_timeout))?
        .map_err(|e| TtsError::SynthesisFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TtsError::SynthesisFailed(format!(
                "upstream returned {}",
                response.status()
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TtsError::SynthesisFailed(e.to_string()))
    }
}
