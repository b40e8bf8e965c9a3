use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-wide counters for the voice pipeline, shared across sessions.
///
/// Cheap to update inline from the Session Controller and Process
/// Supervisor as events occur — no separate metrics actor, each field is
/// an `Arc<AtomicU64>`/`AtomicUsize` updated with `Ordering::Relaxed`.
#[derive(Clone)]
pub struct SessionMetrics {
    pub sessions_active: Arc<AtomicUsize>,
    pub sessions_total: Arc<AtomicU64>,

    pub turns_completed: Arc<AtomicU64>,
    pub turns_interrupted: Arc<AtomicU64>,

    pub stt_upstream_starts: Arc<AtomicU64>,
    pub stt_upstream_start_failures: Arc<AtomicU64>,
    pub stt_utterances_finalized: Arc<AtomicU64>,

    pub llm_requests: Arc<AtomicU64>,
    pub llm_requests_failed: Arc<AtomicU64>,
    pub llm_last_latency_ms: Arc<AtomicU64>,

    pub tts_jobs_submitted: Arc<AtomicU64>,
    pub tts_jobs_failed: Arc<AtomicU64>,
    pub tts_last_latency_ms: Arc<AtomicU64>,

    pub backpressure_disconnects: Arc<AtomicU64>,
    pub heartbeat_timeouts: Arc<AtomicU64>,

    pub last_turn_completed_at: Arc<RwLock<Option<Instant>>>,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            sessions_active: Arc::new(AtomicUsize::new(0)),
            sessions_total: Arc::new(AtomicU64::new(0)),

            turns_completed: Arc::new(AtomicU64::new(0)),
            turns_interrupted: Arc::new(AtomicU64::new(0)),

            stt_upstream_starts: Arc::new(AtomicU64::new(0)),
            stt_upstream_start_failures: Arc::new(AtomicU64::new(0)),
            stt_utterances_finalized: Arc::new(AtomicU64::new(0)),

            llm_requests: Arc::new(AtomicU64::new(0)),
            llm_requests_failed: Arc::new(AtomicU64::new(0)),
            llm_last_latency_ms: Arc::new(AtomicU64::new(0)),

            tts_jobs_submitted: Arc::new(AtomicU64::new(0)),
            tts_jobs_failed: Arc::new(AtomicU64::new(0)),
            tts_last_latency_ms: Arc::new(AtomicU64::new(0)),

            backpressure_disconnects: Arc::new(AtomicU64::new(0)),
            heartbeat_timeouts: Arc::new(AtomicU64::new(0)),

            last_turn_completed_at: Arc::new(RwLock::new(None)),
        }
    }
}

impl SessionMetrics {
    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
        *self.last_turn_completed_at.write() = Some(Instant::now());
    }

    pub fn turn_interrupted(&self) {
        self.turns_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stt_upstream_started(&self, ok: bool) {
        self.stt_upstream_starts.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.stt_upstream_start_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stt_utterance_finalized(&self) {
        self.stt_utterances_finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn llm_request_completed(&self, ok: bool, latency_ms: u64) {
        self.llm_requests.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.llm_requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.llm_last_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn tts_job_completed(&self, ok: bool, latency_ms: u64) {
        self.tts_jobs_submitted.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.tts_jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.tts_last_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn backpressure_disconnect(&self) {
        self.backpressure_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_open_close_tracks_active_count() {
        let m = SessionMetrics::default();
        m.session_opened();
        m.session_opened();
        assert_eq!(m.sessions_active.load(Ordering::Relaxed), 2);
        assert_eq!(m.sessions_total.load(Ordering::Relaxed), 2);
        m.session_closed();
        assert_eq!(m.sessions_active.load(Ordering::Relaxed), 1);
        assert_eq!(m.sessions_total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn turn_completed_updates_timestamp() {
        let m = SessionMetrics::default();
        assert!(m.last_turn_completed_at.read().is_none());
        m.turn_completed();
        assert!(m.last_turn_completed_at.read().is_some());
        assert_eq!(m.turns_completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn failed_llm_request_increments_failure_counter() {
        let m = SessionMetrics::default();
        m.llm_request_completed(false, 250);
        assert_eq!(m.llm_requests.load(Ordering::Relaxed), 1);
        assert_eq!(m.llm_requests_failed.load(Ordering::Relaxed), 1);
        assert_eq!(m.llm_last_latency_ms.load(Ordering::Relaxed), 250);
    }
}
