//! TTS Job Runner: a strictly serial synthesis queue.
//!
//! Jobs are dispatched one at a time, in submission order, by a single
//! background task reading from an unbounded channel — this is what makes
//! "never run two synthesis calls in parallel" true without an explicit
//! lock. Completions are posted back on their own channel, tagged with the
//! turn they belong to so a session that has since moved to a new turn
//! (interrupt, or a fresh utterance) can recognize and ignore stale results.

use std::sync::Arc;

use tokio::sync::mpsc;

use dolores_tts::{TtsConfig, TtsError, TtsUpstream};

/// One TTS slot's lifecycle state.
#[derive(Debug, Clone)]
pub enum SlotState {
    Reserved,
    Ready(Vec<u8>),
    Failed,
}

#[derive(Debug, Clone)]
pub struct TtsSlot {
    pub text: String,
    pub state: SlotState,
}

/// The dense, submission-ordered vector of slots for the current turn.
#[derive(Default)]
pub struct TtsQueue {
    slots: Vec<TtsSlot>,
    pending: usize,
}

impl TtsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next slot for `text`, returning its index.
    pub fn submit(&mut self, text: String) -> u64 {
        let index = self.slots.len() as u64;
        self.slots.push(TtsSlot {
            text,
            state: SlotState::Reserved,
        });
        self.pending += 1;
        index
    }

    pub fn mark_ready(&mut self, index: u64, audio: Vec<u8>) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if matches!(slot.state, SlotState::Reserved) {
                slot.state = SlotState::Ready(audio);
                self.pending = self.pending.saturating_sub(1);
            }
        }
    }

    pub fn mark_failed(&mut self, index: u64) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            if matches!(slot.state, SlotState::Reserved) {
                slot.state = SlotState::Failed;
                self.pending = self.pending.saturating_sub(1);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: u64) -> Option<&TtsSlot> {
        self.slots.get(index as usize)
    }

    /// Drops every slot. Used on interrupt and on turn completion: a new
    /// turn always starts from an empty queue.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.pending = 0;
    }
}

/// One synthesis completion, tagged with the turn it was submitted under.
pub struct TtsCompletion {
    pub turn_id: u64,
    pub index: u64,
    pub result: Result<Vec<u8>, TtsError>,
}

struct TtsJob {
    turn_id: u64,
    index: u64,
    text: String,
}

/// Handle to the background serial dispatch task.
pub struct TtsJobRunner {
    tx: mpsc::UnboundedSender<TtsJob>,
}

impl TtsJobRunner {
    /// Spawns the dispatch task and returns the runner plus its completion
    /// stream. One runner is created per session and lives for the
    /// session's lifetime; turns share it, distinguished by `turn_id`.
    pub fn spawn(
        upstream: Arc<dyn TtsUpstream>,
        config: TtsConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TtsCompletion>) {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<TtsJob>();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel::<TtsCompletion>();

        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                let result = upstream.synthesize(&config, &job.text).await;
                let completion = TtsCompletion {
                    turn_id: job.turn_id,
                    index: job.index,
                    result,
                };
                if completion_tx.send(completion).is_err() {
                    break;
                }
            }
        });

        (Self { tx: job_tx }, completion_rx)
    }

    pub fn submit(&self, turn_id: u64, index: u64, text: String) {
        let _ = self.tx.send(TtsJob {
            turn_id,
            index,
            text,
        });
    }
}
