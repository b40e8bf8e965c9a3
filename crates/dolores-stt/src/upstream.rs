//! The streaming STT upstream connection trait and its websocket realization.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use dolores_foundation::error::SttError;

use crate::error::SttResult;
use crate::types::{SttConfig, SttEvent};

/// One live binding to the upstream STT provider.
///
/// Implementations own the wire connection; `send_frame` forwards raw PCM
/// and `close` tears the connection down. Events (interim, final,
/// utterance-end, error, closed) are delivered out-of-band on the channel
/// handed to [`SttUpstream::connect`], not returned from these calls.
#[async_trait]
pub trait SttConnection: Send {
    async fn send_frame(&mut self, pcm: &[u8]) -> SttResult<()>;
    async fn close(&mut self) -> SttResult<()>;
}

/// Factory for one upstream STT connection.
///
/// A fresh `SttConnection` is opened per utterance lifecycle (see
/// [`crate::session::SttSession`]); the factory itself is stateless and
/// shared across sessions.
#[async_trait]
pub trait SttUpstream: Send + Sync {
    async fn connect(
        &self,
        config: &SttConfig,
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> SttResult<Box<dyn SttConnection>>;
}

/// Incoming event frames from a Deepgram-shaped streaming STT websocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum UpstreamFrame {
    Results {
        is_final: bool,
        speech_final: bool,
        channel: ResultsChannel,
    },
    #[serde(rename = "UtteranceEnd")]
    UtteranceEnd {},
    Error {
        description: String,
    },
}

#[derive(Debug, Deserialize)]
struct ResultsChannel {
    alternatives: Vec<ResultsAlternative>,
}

#[derive(Debug, Deserialize)]
struct ResultsAlternative {
    transcript: String,
}

/// Real upstream: one websocket per connection, query-string configured for
/// PCM S16LE, 16 kHz, mono, Dutch, interim results, smart formatting,
/// endpointing, and the utterance-end timeout; bearer-token authenticated.
pub struct WebsocketSttUpstream;

impl WebsocketSttUpstream {
    pub fn new() -> Self {
        Self
    }

    fn build_url(config: &SttConfig) -> String {
        format!(
            "{}?encoding=linear16&sample_rate={}&channels={}&language={}&interim_results={}&smart_format={}&endpointing={}&utterance_end_ms={}",
            config.endpoint,
            config.sample_rate_hz,
            config.channels,
            config.language,
            config.interim_results,
            config.smart_format,
            config.endpointing.as_millis(),
            config.utterance_end_timeout.as_millis(),
        )
    }
}

impl Default for WebsocketSttUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SttUpstream for WebsocketSttUpstream {
    async fn connect(
        &self,
        config: &SttConfig,
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> SttResult<Box<dyn SttConnection>> {
        let url = Self::build_url(config);
        let mut request = url
            .into_client_request()
            .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("token {}", config.credential))
            .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
        let (write, mut read) = stream.split();

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        let _ = events.send(SttEvent::Error(SttError::Transient(e.to_string())));
                        break;
                    }
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        let _ = events.send(SttEvent::Closed);
                        break;
                    }
                    _ => continue,
                };
                match serde_json::from_str::<UpstreamFrame>(&text) {
                    Ok(UpstreamFrame::Results {
                        is_final,
                        speech_final,
                        channel,
                    }) => {
                        let transcript = channel
                            .alternatives
                            .into_iter()
                            .next()
                            .map(|a| a.transcript)
                            .unwrap_or_default();
                        if transcript.is_empty() {
                            continue;
                        }
                        if is_final || speech_final {
                            let _ = events.send(SttEvent::Final(transcript));
                        } else {
                            let _ = events.send(SttEvent::Interim(transcript));
                        }
                    }
                    Ok(UpstreamFrame::UtteranceEnd {}) => {
                        // The connection itself does not assemble the full
                        // transcript: the session wrapper owns that buffer
                        // and fills it in from accumulated `Final` events.
                        let _ = events.send(SttEvent::UtteranceEnd(String::new()));
                    }
                    Ok(UpstreamFrame::Error { description }) => {
                        // The provider's protocol-level error frame (bad
                        // auth, quota, malformed session) is not a transient
                        // read hiccup; treat it as fatal to this connection.
                        let _ = events.send(SttEvent::Error(SttError::Fatal(description)));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "unrecognized stt upstream frame");
                    }
                }
            }
        });

        Ok(Box::new(WebsocketSttConnection { writer: write }))
    }
}

type WriteHalf = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

struct WebsocketSttConnection {
    writer: WriteHalf,
}

#[async_trait]
impl SttConnection for WebsocketSttConnection {
    async fn send_frame(&mut self, pcm: &[u8]) -> SttResult<()> {
        self.writer
            .send(Message::Binary(pcm.to_vec()))
            .await
            .map_err(|e| SttError::Transient(e.to_string()))
    }

    async fn close(&mut self) -> SttResult<()> {
        let _ = self.writer.close().await;
        Ok(())
    }
}
