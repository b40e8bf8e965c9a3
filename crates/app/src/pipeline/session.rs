//! Session Controller / state machine.
//!
//! One actor per client connection serializes every state mutation:
//! concurrent subtasks (the STT upstream's read loop, the LLM delta
//! stream, each TTS job, the transport's read loop, and the heartbeat and
//! playback-timeout timers) only ever *post events* here; nothing outside
//! this file touches `state`, `ttsQueue`, `nextEmitIndex`, `pendingTts`, or
//! `llmDone` directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;

use dolores_foundation::clock::SharedClock;
use dolores_llm::{LlmConfig, LlmError, LlmUpstream};
use dolores_stt::{SttConfig, SttEvent, SttSession, SttUpstream};
use dolores_telemetry::SessionMetrics;
use dolores_tts::{TtsConfig, TtsError, TtsUpstream};

use dolores_foundation::error::{OrchestratorError, RecoveryStrategy, TransportError};
use dolores_foundation::shutdown::ShutdownGuard;

use crate::config::TimingConfig;
use crate::pipeline::emitter::Emitter;
use crate::pipeline::segmenter;
use crate::pipeline::tts_queue::TtsJobRunner;
use crate::pipeline::tts_queue::TtsQueue;
use crate::transport::{ClientMessage, ServerMessage, TransportReader, TransportWriter};

/// `listening` / `processing` / `speaking`. Serialized in outbound
/// `state` messages with the same spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Listening,
    Processing,
    Speaking,
}

/// An optional gate on inbound audio frames, before they reach the STT
/// upstream. No speaker-verification model is wired in yet, so this stays
/// a constant predicate rather than an inferred implementation.
pub type SpeakerVerifier = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

pub fn const_true_verifier() -> SpeakerVerifier {
    Arc::new(|_| true)
}

static SESSION_IDS: AtomicU64 = AtomicU64::new(1);

/// Everything one connection needs to run its pipeline, assembled by the
/// Process Supervisor from process-wide configuration and upstream
/// factories.
pub struct SessionDeps {
    pub stt_upstream: Arc<dyn SttUpstream>,
    pub stt_config: SttConfig,
    pub llm_upstream: Arc<dyn LlmUpstream>,
    pub llm_config: LlmConfig,
    pub tts_upstream: Arc<dyn TtsUpstream>,
    pub tts_config: TtsConfig,
    pub timing: TimingConfig,
    pub clock: SharedClock,
    pub metrics: SessionMetrics,
    pub speaker_verifier: SpeakerVerifier,
    pub shutdown: ShutdownGuard,
}

enum SessionEvent {
    Client(ClientMessage),
    TransportClosed,
    Stt(SttEvent),
    LlmStreamStarted {
        turn_id: u64,
        cancel: CancellationToken,
    },
    LlmStreamFailed {
        turn_id: u64,
        error: LlmError,
    },
    LlmDelta {
        turn_id: u64,
        delta: Result<String, LlmError>,
    },
    LlmStreamEnded {
        turn_id: u64,
    },
    TtsSlotDone {
        turn_id: u64,
        index: u64,
        result: Result<Vec<u8>, TtsError>,
    },
    PlaybackTimeout {
        turn_id: u64,
    },
    Heartbeat,
}

/// Runs one session to completion. Spawns the transport read loop and the
/// heartbeat ticker, then drives the actor loop inline until disconnect.
pub async fn run(mut reader: TransportReader, transport: TransportWriter, deps: SessionDeps) {
    let id = SESSION_IDS.fetch_add(1, Ordering::Relaxed);
    let shutdown = deps.shutdown.clone();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();

    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = reader.recv().await {
                let event = match msg {
                    Ok(client_msg) => SessionEvent::Client(client_msg),
                    Err(e) => {
                        tracing::warn!(session_id = id, error = %e, "protocol violation");
                        continue;
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            let _ = tx.send(SessionEvent::TransportClosed);
        });
    }

    let heartbeat_interval = deps.timing.heartbeat_interval();
    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            ticker.tick().await; // the first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if tx.send(SessionEvent::Heartbeat).is_err() {
                    break;
                }
            }
        });
    }

    let mut session = Session::new(id, transport, deps, events_tx);
    session.send_config().await;
    tracing::info!(session_id = id, "session started");

    // A process shutdown signal races the event channel so the session
    // tears down in an orderly way (STT destroyed, transport closed) on
    // its own rather than depending on the Process Supervisor's grace-
    // period `abort_all()` fallback.
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        if session.handle(event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown.wait() => {
                tracing::info!(session_id = id, "shutdown requested, ending session");
                break;
            }
        }
    }

    session.shutdown().await;
    tracing::info!(session_id = id, "session ended");
}

struct Session {
    id: u64,
    state: SessionState,
    transport: TransportWriter,
    events_tx: mpsc::UnboundedSender<SessionEvent>,

    stt: Arc<SttSession>,
    stt_events_tx: mpsc::UnboundedSender<SttEvent>,
    utterance_buffer: String,

    llm_upstream: Arc<dyn LlmUpstream>,
    llm_config: LlmConfig,
    llm_cancel: Option<CancellationToken>,

    tts_runner: TtsJobRunner,
    tts_queue: TtsQueue,
    emitter: Emitter,
    segment_buffer: String,
    llm_done: bool,

    turn_id: u64,
    turn_started_at: Instant,
    awaiting_playback_ack: bool,

    clock: SharedClock,
    mute_until: Instant,
    last_activity: Instant,
    timing: TimingConfig,
    metrics: SessionMetrics,
    speaker_verifier: SpeakerVerifier,

    /// Set once an outbound send fails (backpressure breach or socket
    /// error), or once an upstream error's `recovery_strategy()` calls for
    /// tearing the session down; checked at the end of
    /// [`handle`](Self::handle) so the session-end path always runs.
    terminate: bool,
}

impl Session {
    fn new(
        id: u64,
        transport: TransportWriter,
        deps: SessionDeps,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (stt_events_tx, mut stt_events_rx) = mpsc::unbounded_channel::<SttEvent>();
        {
            let tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = stt_events_rx.recv().await {
                    if tx.send(SessionEvent::Stt(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let (tts_runner, mut tts_completions) = TtsJobRunner::spawn(deps.tts_upstream, deps.tts_config);
        {
            let tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(completion) = tts_completions.recv().await {
                    let event = SessionEvent::TtsSlotDone {
                        turn_id: completion.turn_id,
                        index: completion.index,
                        result: completion.result,
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
        }

        let stt = Arc::new(SttSession::new(deps.stt_upstream, deps.stt_config));
        deps.metrics.session_opened();
        let now = deps.clock.now();

        Self {
            id,
            state: SessionState::Listening,
            transport,
            events_tx,

            stt,
            stt_events_tx,
            utterance_buffer: String::new(),

            llm_upstream: deps.llm_upstream,
            llm_config: deps.llm_config,
            llm_cancel: None,

            tts_runner,
            tts_queue: TtsQueue::new(),
            emitter: Emitter::new(),
            segment_buffer: String::new(),
            llm_done: false,

            turn_id: 0,
            turn_started_at: now,
            awaiting_playback_ack: false,

            clock: deps.clock,
            mute_until: now,
            last_activity: now,
            timing: deps.timing,
            metrics: deps.metrics,
            speaker_verifier: deps.speaker_verifier,
            terminate: false,
        }
    }

    /// Sends one outbound message. A failed send (backpressure breach or
    /// socket error) marks the session for termination instead of
    /// being silently swallowed or retried — the caller just keeps going
    /// and `handle` tears the session down once the current event finishes.
    async fn emit(&mut self, message: ServerMessage) {
        if let Err(e) = self.transport.send(&message).await {
            tracing::warn!(session_id = self.id, error = %e, "outbound send failed, disconnecting");
            if matches!(e, TransportError::BackpressureExceeded { .. }) {
                self.metrics.backpressure_disconnect();
            }
            self.terminate = true;
        }
    }

    async fn send_config(&mut self) {
        self.emit(ServerMessage::Config {
            version: 1,
            stt: "websocket-streaming".to_string(),
            tts: "http-streaming".to_string(),
            speaker_verification: false,
            backend: self.llm_config.model.clone(),
        })
        .await;
    }

    /// Dispatches one event. Returns `true` when the session should stop.
    async fn handle(&mut self, event: SessionEvent) -> bool {
        let stop = match event {
            SessionEvent::Client(msg) => {
                self.last_activity = self.clock.now();
                match msg {
                    ClientMessage::Audio { data } => self.on_audio(data).await,
                    ClientMessage::PlaybackDone => self.on_playback_done().await,
                    ClientMessage::Interrupt => self.on_interrupt().await,
                    ClientMessage::Ping => self.emit(ServerMessage::Pong).await,
                }
                false
            }
            SessionEvent::TransportClosed => true,
            SessionEvent::Stt(event) => {
                self.handle_stt(event).await;
                false
            }
            SessionEvent::LlmStreamStarted { turn_id, cancel } => {
                self.on_llm_stream_started(turn_id, cancel);
                false
            }
            SessionEvent::LlmStreamFailed { turn_id, error } => {
                self.on_llm_stream_failed(turn_id, error).await;
                false
            }
            SessionEvent::LlmDelta { turn_id, delta } => {
                self.on_llm_delta(turn_id, delta).await;
                false
            }
            SessionEvent::LlmStreamEnded { turn_id } => {
                self.on_llm_stream_ended(turn_id).await;
                false
            }
            SessionEvent::TtsSlotDone {
                turn_id,
                index,
                result,
            } => {
                self.on_tts_slot_done(turn_id, index, result).await;
                false
            }
            SessionEvent::PlaybackTimeout { turn_id } => {
                self.on_playback_timeout(turn_id).await;
                false
            }
            SessionEvent::Heartbeat => self.on_heartbeat(),
        };
        // A mid-turn send failure (backpressure breach or socket error)
        // terminates the session just like an explicit disconnect.
        stop || std::mem::take(&mut self.terminate)
    }

    /// An inbound frame never reaches STT while the
    /// session isn't `listening`, or while still inside a mute window.
    async fn on_audio(&mut self, data: String) {
        if self.state != SessionState::Listening || self.clock.now() < self.mute_until {
            return;
        }

        let pcm = match BASE64.decode(data) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.emit(ServerMessage::Error {
                    error: format!("invalid audio payload: {e}"),
                })
                .await;
                return;
            }
        };

        if !(self.speaker_verifier)(&pcm) {
            return;
        }

        // `push_frame` lazily connects the STT upstream, which can suspend
        // for up to the configured start timeout; dispatch it to a
        // background task rather than blocking the actor loop on it, and
        // report a failure back through the normal `SttEvent` path.
        let stt = self.stt.clone();
        let events_tx = self.stt_events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = stt.push_frame(&pcm, events_tx.clone()).await {
                let _ = events_tx.send(SttEvent::Error(e));
            }
        });
    }

    async fn on_playback_done(&mut self) {
        if self.state == SessionState::Speaking && self.awaiting_playback_ack {
            self.to_listening(self.timing.post_playback_mute()).await;
        }
    }

    async fn on_playback_timeout(&mut self, turn_id: u64) {
        if turn_id == self.turn_id && self.state == SessionState::Speaking && self.awaiting_playback_ack {
            tracing::debug!(session_id = self.id, "playback_done timed out, resuming listening");
            self.to_listening(self.timing.post_playback_mute()).await;
        }
    }

    /// Cancellation ordering on leaving `speaking`: drop queued
    /// slots, cancel the LLM stream, destroy STT (defensively — it is
    /// already absent outside `listening`), emit a final `audio_end` if
    /// audio had started, then update state.
    async fn on_interrupt(&mut self) {
        if self.state == SessionState::Listening {
            return;
        }

        self.tts_queue.reset();
        self.emitter.reset();

        if let Some(cancel) = self.llm_cancel.take() {
            cancel.cancel();
        }

        self.stt.close().await;

        if self.state == SessionState::Speaking {
            self.emit(ServerMessage::AudioEnd).await;
        }

        self.turn_id += 1; // invalidate in-flight deltas/completions for this turn
        self.llm_done = true;
        self.awaiting_playback_ack = false;
        self.metrics.turn_interrupted();

        self.to_listening(self.timing.post_interrupt_mute()).await;
    }

    async fn to_listening(&mut self, mute: Duration) {
        self.state = SessionState::Listening;
        self.mute_until = self.clock.now() + mute;
        self.awaiting_playback_ack = false;
        self.emit(ServerMessage::State { state: self.state }).await;
    }

    async fn handle_stt(&mut self, event: SttEvent) {
        // STT is destroyed the instant the session leaves `listening`; a
        // late event from a connection that's already being torn down is
        // stale and must not be acted on (echo-prevention discipline).
        if self.state != SessionState::Listening {
            return;
        }

        match event {
            SttEvent::Interim(text) => {
                tracing::trace!(session_id = self.id, %text, "stt interim");
            }
            SttEvent::Final(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    if !self.utterance_buffer.is_empty() {
                        self.utterance_buffer.push(' ');
                    }
                    self.utterance_buffer.push_str(text);
                }
            }
            SttEvent::UtteranceEnd(_) => {
                let transcript = self.utterance_buffer.trim().to_string();
                self.utterance_buffer.clear();
                if transcript.is_empty() {
                    // An all-silence utterance: no transcript, no LLM call,
                    // stays in `listening`.
                    return;
                }

                self.metrics.stt_utterance_finalized();
                self.stt.close().await;

                self.emit(ServerMessage::Transcript {
                    text: transcript.clone(),
                })
                .await;

                self.state = SessionState::Processing;
                self.emit(ServerMessage::State { state: self.state }).await;

                self.start_llm(transcript).await;
            }
            SttEvent::Error(err) => {
                tracing::warn!(session_id = self.id, error = %err, "stt upstream error");
                self.metrics.stt_upstream_started(false);
                self.stt.close().await;
                let message = err.to_string();
                self.emit(ServerMessage::Error { error: message }).await;
                // Classify via the same decision mechanism the Process
                // Supervisor uses: transient upstream failures stay in the
                // session (already did, above); anything else tears it down.
                match OrchestratorError::Stt(err).recovery_strategy() {
                    RecoveryStrategy::ResumeListening => {}
                    RecoveryStrategy::TerminateSession
                    | RecoveryStrategy::Fatal
                    | RecoveryStrategy::Retry { .. } => {
                        self.terminate = true;
                    }
                }
            }
            SttEvent::Closed => {
                tracing::debug!(session_id = self.id, "stt upstream closed");
            }
        }
    }

    /// Dispatches the LLM request without awaiting it: `stream()` performs
    /// a full POST-and-await-headers round trip up to `llm_request_timeout`
    /// before it even returns a handle, which must not block the actor loop
    /// (barge-in has to stay responsive through this window). The connect
    /// and the SSE-parsing delta forwarder both run in one spawned task, so
    /// `LlmStreamStarted`/`LlmStreamFailed` and every `LlmDelta` for this
    /// turn arrive on `events_tx` in order.
    async fn start_llm(&mut self, transcript: String) {
        self.turn_id += 1;
        let turn_id = self.turn_id;
        self.llm_done = false;
        self.segment_buffer.clear();
        self.tts_queue.reset();
        self.emitter.reset();
        self.awaiting_playback_ack = false;
        self.turn_started_at = self.clock.now();

        let llm_upstream = self.llm_upstream.clone();
        let llm_config = self.llm_config.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            match llm_upstream.stream(&llm_config, &transcript).await {
                Ok(handle) => {
                    if tx
                        .send(SessionEvent::LlmStreamStarted {
                            turn_id,
                            cancel: handle.cancel,
                        })
                        .is_err()
                    {
                        return;
                    }
                    let mut deltas = handle.deltas;
                    while let Some(delta) = deltas.recv().await {
                        if tx.send(SessionEvent::LlmDelta { turn_id, delta }).is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(SessionEvent::LlmStreamEnded { turn_id });
                }
                Err(error) => {
                    let _ = tx.send(SessionEvent::LlmStreamFailed { turn_id, error });
                }
            }
        });
    }

    /// Stores the cancellation handle for the now-connected stream, unless
    /// the turn already moved on (barge-in) while the request was
    /// connecting — in which case this handle is stale and is cancelled
    /// immediately instead of being kept around.
    fn on_llm_stream_started(&mut self, turn_id: u64, cancel: CancellationToken) {
        if turn_id != self.turn_id {
            cancel.cancel();
            return;
        }
        self.llm_cancel = Some(cancel);
    }

    async fn on_llm_stream_failed(&mut self, turn_id: u64, error: LlmError) {
        if turn_id != self.turn_id {
            return;
        }

        tracing::warn!(session_id = self.id, error = %error, "llm request failed");
        self.metrics.llm_request_completed(false, 0);
        self.emit(ServerMessage::Error { error: error.to_string() }).await;
        self.llm_done = true;
        self.to_listening(Duration::ZERO).await;
    }

    async fn on_llm_delta(&mut self, turn_id: u64, delta: Result<String, LlmError>) {
        if turn_id != self.turn_id {
            return; // stale: the turn this delta belongs to was interrupted
        }

        match delta {
            Ok(text) => {
                self.segment_buffer.push_str(&text);
                let (sentences, residual) = segmenter::segment(&self.segment_buffer);
                self.segment_buffer = residual;
                for sentence in sentences {
                    let index = self.tts_queue.submit(sentence.clone());
                    self.tts_runner.submit(turn_id, index, sentence);
                }
            }
            Err(e) => {
                tracing::warn!(session_id = self.id, error = %e, "llm stream error");
                if matches!(
                    OrchestratorError::Llm(e).recovery_strategy(),
                    RecoveryStrategy::TerminateSession | RecoveryStrategy::Fatal
                ) {
                    self.terminate = true;
                }
            }
        }
    }

    async fn on_llm_stream_ended(&mut self, turn_id: u64) {
        if turn_id != self.turn_id {
            return;
        }

        if let Some(residual) = segmenter::force_flush(&self.segment_buffer) {
            let index = self.tts_queue.submit(residual.clone());
            self.tts_runner.submit(turn_id, index, residual);
        }
        self.segment_buffer.clear();

        let latency_ms = self
            .clock
            .now()
            .saturating_duration_since(self.turn_started_at)
            .as_millis() as u64;
        self.metrics.llm_request_completed(true, latency_ms);

        self.llm_done = true;
        self.try_emit().await;
        self.try_close_turn().await;
    }

    async fn on_tts_slot_done(&mut self, turn_id: u64, index: u64, result: Result<Vec<u8>, TtsError>) {
        if turn_id != self.turn_id {
            return;
        }

        match result {
            Ok(audio) => {
                self.tts_queue.mark_ready(index, audio);
                self.metrics.tts_job_completed(true, 0);
            }
            Err(e) => {
                tracing::warn!(session_id = self.id, error = %e, index, "tts synthesis failed");
                self.tts_queue.mark_failed(index);
                self.metrics.tts_job_completed(false, 0);
                if matches!(
                    OrchestratorError::Tts(e).recovery_strategy(),
                    RecoveryStrategy::TerminateSession | RecoveryStrategy::Fatal
                ) {
                    self.terminate = true;
                }
            }
        }

        self.try_emit().await;
        self.try_close_turn().await;
    }

    /// Ordered Audio Emitter: the first *successful* emission is
    /// what drives `processing -> speaking`, not a skipped failed slot.
    async fn try_emit(&mut self) {
        let drained = self.emitter.drain(&self.tts_queue);
        for (index, audio) in drained {
            if let Some(bytes) = audio {
                if self.state == SessionState::Processing {
                    self.state = SessionState::Speaking;
                    self.emit(ServerMessage::State { state: self.state }).await;
                }
                let data = BASE64.encode(bytes);
                self.emit(ServerMessage::audio(data, index)).await;
            }
        }
    }

    async fn try_close_turn(&mut self) {
        if !(self.llm_done && self.tts_queue.pending() == 0 && self.emitter.is_fully_drained(&self.tts_queue)) {
            return;
        }

        match self.state {
            SessionState::Speaking => {
                self.emit(ServerMessage::AudioEnd).await;
                self.awaiting_playback_ack = true;
                self.metrics.turn_completed();
                self.schedule_playback_timeout();
            }
            SessionState::Processing => {
                // LLM finished but nothing was ever successfully synthesized
                // (LLM done, no audio ever produced -> back to listening).
                self.metrics.turn_completed();
                self.to_listening(Duration::ZERO).await;
            }
            SessionState::Listening => {}
        }

        self.tts_queue.reset();
        self.emitter.reset();
    }

    fn schedule_playback_timeout(&self) {
        let tx = self.events_tx.clone();
        let turn_id = self.turn_id;
        let timeout = self.timing.playback_done_timeout();
        tokio::spawn(async move {
            sleep(timeout).await;
            let _ = tx.send(SessionEvent::PlaybackTimeout { turn_id });
        });
    }

    /// Transport-level liveness: any inbound message counts, so a
    /// silent connection is terminated once it misses a full heartbeat
    /// window without sending anything.
    fn on_heartbeat(&mut self) -> bool {
        if self.clock.now().saturating_duration_since(self.last_activity) > self.timing.heartbeat_interval() {
            tracing::warn!(session_id = self.id, "heartbeat timeout, disconnecting");
            self.metrics.heartbeat_timeout();
            true
        } else {
            false
        }
    }

    async fn shutdown(&mut self) {
        self.stt.close().await;
        if let Some(cancel) = self.llm_cancel.take() {
            cancel.cancel();
        }
        self.transport.close().await;
        self.metrics.session_closed();
    }
}
