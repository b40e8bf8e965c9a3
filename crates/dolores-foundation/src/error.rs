use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the orchestrator process.
///
/// Mirrors the per-concern split used across the workspace: each subsystem
/// gets its own `thiserror` enum, and `OrchestratorError` aggregates them
/// with `#[from]` so call sites can use `?` while still letting callers
/// match on the concrete subsystem when deciding a recovery strategy.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Tts(#[from] TtsError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("component failed health check: {component}")]
    HealthCheckFailed { component: String },

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("fatal error, cannot recover: {0}")]
    Fatal(String),
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(err: tokio::task::JoinError) -> Self {
        OrchestratorError::Fatal(format!("task join failed: {err}"))
    }
}

/// Errors from the per-connection message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("backpressure high-watermark exceeded: {buffered} bytes buffered")]
    BackpressureExceeded { buffered: usize },

    #[error("heartbeat timeout: no liveness in {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    Socket(String),
}

/// Errors from the streaming speech-to-text upstream and its session wrapper.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    #[error("upstream start timed out after {0:?}")]
    StartTimeout(Duration),

    #[error("upstream connection failed: {0}")]
    ConnectFailed(String),

    #[error("upstream closed unexpectedly: {0}")]
    UpstreamClosed(String),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("fatal upstream failure: {0}")]
    Fatal(String),
}

impl SttError {
    /// Whether the failure should send the session back to `listening`
    /// (log + surface an `error` message) rather than tearing the session down.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SttError::StartTimeout(_) | SttError::ConnectFailed(_) | SttError::Transient(_)
        )
    }
}

/// Errors from the streaming LLM upstream.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    RequestFailed(String),

    #[error("malformed stream event: {0}")]
    MalformedEvent(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Errors from text-to-speech synthesis of a single sentence.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("voice not found: {0}")]
    VoiceNotFound(String),
}

/// Errors raised by the Session Controller itself (not by an upstream).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already terminated")]
    AlreadyTerminated,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Configuration loading / validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration parse error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("missing required setting: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },
}

/// How the Process Supervisor / Session Controller should react to an error.
#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    /// Log and retry the same operation after a delay.
    Retry { max_attempts: u32, delay: Duration },
    /// Return the session to `listening` and continue; the turn is abandoned.
    ResumeListening,
    /// Tear the session down entirely.
    TerminateSession,
    /// Unrecoverable; the process should exit.
    Fatal,
}

impl OrchestratorError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            OrchestratorError::Stt(e) if e.is_transient() => RecoveryStrategy::ResumeListening,
            OrchestratorError::Stt(_) => RecoveryStrategy::TerminateSession,
            OrchestratorError::Llm(LlmError::Cancelled) => RecoveryStrategy::ResumeListening,
            OrchestratorError::Llm(_) => RecoveryStrategy::ResumeListening,
            OrchestratorError::Tts(_) => RecoveryStrategy::ResumeListening,
            OrchestratorError::Transport(TransportError::BackpressureExceeded { .. })
            | OrchestratorError::Transport(TransportError::HeartbeatTimeout(_)) => {
                RecoveryStrategy::TerminateSession
            }
            OrchestratorError::Transport(_) => RecoveryStrategy::ResumeListening,
            OrchestratorError::Config(_) | OrchestratorError::Fatal(_) => RecoveryStrategy::Fatal,
            OrchestratorError::ShutdownRequested => RecoveryStrategy::Fatal,
            OrchestratorError::Session(_) => RecoveryStrategy::TerminateSession,
            OrchestratorError::HealthCheckFailed { .. } => RecoveryStrategy::Retry {
                max_attempts: 3,
                delay: Duration::from_secs(2),
            },
        }
    }
}
