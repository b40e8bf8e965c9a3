//! Scriptable fake upstream for exercising the TTS Job Runner and Ordered
//! Audio Emitter without a real network call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TtsResult;
use crate::types::TtsConfig;
use crate::upstream::TtsUpstream;
use dolores_foundation::error::TtsError;

/// Synthesizes deterministic non-empty audio for any sentence, except those
/// whose 0-based submission index is listed in `fail_on` (used to exercise
/// the "failed slot is skipped but still advances `nextEmitIndex`" path).
pub struct ScriptedTtsUpstream {
    fail_on: HashSet<usize>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTtsUpstream {
    pub fn new(fail_on: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_on: fail_on.into_iter().collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsUpstream for ScriptedTtsUpstream {
    async fn synthesize(&self, _config: &TtsConfig, text: &str) -> TtsResult<Vec<u8>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&index) {
            return Err(TtsError::SynthesisFailed(format!(
                "scripted failure for sentence {index}"
            )));
        }
        // One non-empty, deterministically sized PCM artifact per sentence.
        Ok(vec![0xAB; text.len().max(1) * 2])
    }
}
