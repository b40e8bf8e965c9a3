//! Scriptable fake upstream for exercising the Sentence Segmenter and
//! Session Controller without a real network call.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::LlmResult;
use crate::streamer::{LlmStreamHandle, LlmUpstream};
use crate::types::LlmConfig;

/// Replays a fixed sequence of text deltas, stopping early if the handle's
/// cancellation token fires between deltas.
pub struct ScriptedLlmUpstream {
    deltas: Vec<String>,
}

impl ScriptedLlmUpstream {
    pub fn new(deltas: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl LlmUpstream for ScriptedLlmUpstream {
    async fn stream(&self, _config: &LlmConfig, _transcript: &str) -> LlmResult<LlmStreamHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let deltas = self.deltas.clone();

        tokio::spawn(async move {
            for delta in deltas {
                if task_cancel.is_cancelled() {
                    return;
                }
                if tx.send(Ok(delta)).is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }
        });

        Ok(LlmStreamHandle { deltas: rx, cancel })
    }
}
