//! The streaming LLM upstream trait and its server-sent-events realization.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::LlmResult;
use crate::types::{LlmConfig, SYSTEM_PROMPT};
use dolores_foundation::error::LlmError;

/// A lazy, cancellable sequence of text deltas from one LLM request.
pub struct LlmStreamHandle {
    pub deltas: mpsc::UnboundedReceiver<LlmResult<String>>,
    pub cancel: CancellationToken,
}

impl LlmStreamHandle {
    /// Cooperative cancellation: the consumer stops iterating
    /// and the underlying request is abandoned.
    pub fn cancel_now(&self) {
        self.cancel.cancel();
    }
}

/// One streaming LLM request, yielding incremental text deltas.
#[async_trait]
pub trait LlmUpstream: Send + Sync {
    async fn stream(&self, config: &LlmConfig, transcript: &str) -> LlmResult<LlmStreamHandle>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    system: &'a str,
    stream: bool,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Real upstream: an SSE chat-completion endpoint. Deltas are extracted
/// from either an OpenAI-shaped `choices[0].delta.content` or an
/// Anthropic-shaped `delta.text` field; any event that carries neither
/// (tool-use artefacts, media references) is silently dropped rather than
/// yielded.
pub struct SseLlmUpstream {
    client: reqwest::Client,
}

impl SseLlmUpstream {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn extract_delta(event: &Value) -> Option<String> {
        if let Some(text) = event
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            return Some(text.to_string());
        }
        if let Some(text) = event.pointer("/delta/text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        None
    }
}

impl Default for SseLlmUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmUpstream for SseLlmUpstream {
    async fn stream(&self, config: &LlmConfig, transcript: &str) -> LlmResult<LlmStreamHandle> {
        let body = ChatRequest {
            model: &config.model,
            system: SYSTEM_PROMPT,
            stream: true,
            messages: [ChatMessage {
                role: "user",
                content: transcript,
            }],
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
        .map_err(|_| LlmError::Timeout(config.request_timeout))?
        .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::RequestFailed(format!(
                "upstream returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    chunk = bytes_stream.next() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::RequestFailed(e.to_string())));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find("\n\n") {
                    let event_block: String = buffer.drain(..pos + 2).collect();
                    for line in event_block.lines() {
                        let Some(payload) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if payload == "[DONE]" {
                            return;
                        }
                        match serde_json::from_str::<Value>(payload) {
                            Ok(event) => {
                                if let Some(delta) = SseLlmUpstream::extract_delta(&event) {
                                    if tx.send(Ok(delta)).is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(LlmError::MalformedEvent(e.to_string())));
                            }
                        }
                    }
                }
            }
        });

        Ok(LlmStreamHandle { deltas: rx, cancel })
    }
}
