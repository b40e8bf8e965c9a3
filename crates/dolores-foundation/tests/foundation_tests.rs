//! Integration tests for the foundation crate's public surface.
//!
//! Unit coverage for `Clock`, `ShutdownHandler`, and `StateManager` already
//! lives alongside their modules; this file exercises the error taxonomy
//! and clock factory functions as a caller outside the crate would.

use dolores_foundation::clock::{real_clock, test_clock, Clock};
use dolores_foundation::error::{
    ConfigError, LlmError, OrchestratorError, RecoveryStrategy, SessionError, SttError,
    TransportError, TtsError,
};
use dolores_foundation::env::{is_ci, is_dev};
use std::time::Duration;

// ─── Clock factory functions ────────────────────────────────────────

#[test]
fn real_clock_factory_reports_current_time() {
    let clock = real_clock();
    let t = clock.now();
    assert!(t.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_clock_factory_advances_on_sleep() {
    let clock = test_clock();
    let t0 = clock.now();
    clock.sleep(Duration::from_secs(3));
    assert_eq!(clock.now().duration_since(t0), Duration::from_secs(3));
}

// ─── env helpers ─────────────────────────────────────────────────────

#[test]
fn is_dev_matches_debug_assertions() {
    assert_eq!(is_dev(), cfg!(debug_assertions));
}

#[test]
fn is_ci_does_not_panic() {
    // No assumption about the host's environment, just that it's callable.
    let _ = is_ci();
}

// ─── Error message formatting ────────────────────────────────────────

#[test]
fn transport_error_backpressure_message_contains_byte_count() {
    let err = TransportError::BackpressureExceeded { buffered: 9_000_000 };
    assert!(format!("{err}").contains("9000000"));
}

#[test]
fn stt_error_transient_classification() {
    assert!(SttError::StartTimeout(Duration::from_secs(10)).is_transient());
    assert!(SttError::ConnectFailed("refused".into()).is_transient());
    assert!(!SttError::Fatal("unrecoverable".into()).is_transient());
}

#[test]
fn config_error_validation_message_names_the_field() {
    let err = ConfigError::Validation {
        field: "stt_start_timeout_ms".to_string(),
        reason: "must be nonzero".to_string(),
    };
    let msg = format!("{err}");
    assert!(msg.contains("stt_start_timeout_ms"));
    assert!(msg.contains("must be nonzero"));
}

#[test]
fn session_error_invalid_transition_names_both_states() {
    let err = SessionError::InvalidTransition {
        from: "speaking".to_string(),
        to: "speaking".to_string(),
    };
    assert!(format!("{err}").contains("speaking -> speaking"));
}

// ─── Aggregation into OrchestratorError ──────────────────────────────

#[test]
fn orchestrator_error_from_transport_error() {
    let err: OrchestratorError = TransportError::Closed.into();
    assert!(matches!(err, OrchestratorError::Transport(TransportError::Closed)));
}

#[test]
fn orchestrator_error_from_stt_error() {
    let err: OrchestratorError = SttError::Fatal("boom".to_string()).into();
    assert!(matches!(err, OrchestratorError::Stt(_)));
}

#[test]
fn orchestrator_error_from_llm_error() {
    let err: OrchestratorError = LlmError::Cancelled.into();
    assert!(matches!(err, OrchestratorError::Llm(LlmError::Cancelled)));
}

#[test]
fn orchestrator_error_from_tts_error() {
    let err: OrchestratorError = TtsError::VoiceNotFound("nl-NL-wavenet-x".to_string()).into();
    assert!(matches!(err, OrchestratorError::Tts(_)));
}

// ─── Recovery strategy classification ────────────────────────────────

#[test]
fn backpressure_breach_terminates_the_session() {
    let err: OrchestratorError =
        TransportError::BackpressureExceeded { buffered: 1 << 23 }.into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::TerminateSession
    ));
}

#[test]
fn heartbeat_timeout_terminates_the_session() {
    let err: OrchestratorError = TransportError::HeartbeatTimeout(Duration::from_secs(30)).into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::TerminateSession
    ));
}

#[test]
fn transient_stt_failure_resumes_listening() {
    let err: OrchestratorError = SttError::ConnectFailed("reset".to_string()).into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::ResumeListening
    ));
}

#[test]
fn fatal_stt_failure_terminates_the_session() {
    let err: OrchestratorError = SttError::Fatal("unrecoverable".to_string()).into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::TerminateSession
    ));
}

#[test]
fn llm_failure_resumes_listening_rather_than_tearing_down_the_session() {
    let err: OrchestratorError = LlmError::RequestFailed("503".to_string()).into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::ResumeListening
    ));
}

#[test]
fn tts_failure_resumes_listening() {
    let err: OrchestratorError = TtsError::SynthesisFailed("upstream 500".to_string()).into();
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::ResumeListening
    ));
}

#[test]
fn config_error_is_fatal_to_the_process() {
    let err: OrchestratorError = ConfigError::MissingField("stt_credential".to_string()).into();
    assert!(matches!(err.recovery_strategy(), RecoveryStrategy::Fatal));
}

#[test]
fn health_check_failure_retries() {
    let err = OrchestratorError::HealthCheckFailed {
        component: "stt-upstream".to_string(),
    };
    assert!(matches!(
        err.recovery_strategy(),
        RecoveryStrategy::Retry { max_attempts: 3, .. }
    ));
}
