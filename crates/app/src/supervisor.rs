//! Process Supervisor: binds the listening port, accepts
//! connections, spawns one session actor per connection, and on
//! `SIGINT`/`SIGTERM` stops accepting and gives in-flight sessions a
//! bounded grace period to close before returning.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use dolores_foundation::clock::real_clock;
use dolores_foundation::error::OrchestratorError;
use dolores_foundation::health::HealthMonitor;
use dolores_foundation::shutdown::ShutdownHandler;
use dolores_foundation::state::{AppState, StateManager};
use dolores_llm::{LlmConfig, LlmUpstream, SseLlmUpstream};
use dolores_stt::{SttConfig, SttUpstream, WebsocketSttUpstream};
use dolores_telemetry::SessionMetrics;
use dolores_tts::{HttpTtsUpstream, TtsConfig, TtsUpstream};

use crate::config::Settings;
use crate::pipeline::{self, SessionDeps};
use crate::transport;

/// Bounded window given to in-flight sessions to finish after a shutdown
/// signal before the process exits regardless.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Distinct from other fatal startup failures so the binary can exit
    /// with its own code: the port being already bound gets a distinct exit code.
    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error(transparent)]
    Other(#[from] OrchestratorError),
}

/// Binds and serves connections until a shutdown signal arrives.
pub async fn serve(settings: Settings) -> Result<(), SupervisorError> {
    let listener = match TcpListener::bind(("0.0.0.0", settings.port)).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            return Err(SupervisorError::PortInUse(settings.port))
        }
        Err(e) => {
            return Err(OrchestratorError::Fatal(format!(
                "failed to bind port {}: {e}",
                settings.port
            ))
            .into())
        }
    };
    tracing::info!(port = settings.port, "listening");

    let state_manager = StateManager::new();
    let _health_monitor = HealthMonitor::new(Duration::from_secs(10)).start();
    let shutdown = ShutdownHandler::new().install().await;
    let metrics = SessionMetrics::default();

    state_manager.transition(AppState::Running)?;

    let stt_upstream: Arc<dyn SttUpstream> = Arc::new(WebsocketSttUpstream::new());
    let tts_upstream: Arc<dyn TtsUpstream> = Arc::new(HttpTtsUpstream::new());
    let llm_upstream: Arc<dyn LlmUpstream> = Arc::new(SseLlmUpstream::new());

    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                tracing::debug!(%peer, "accepted connection");

                let mut stt_config = SttConfig::new(settings.stt_credential.clone(), settings.stt_endpoint.clone());
                stt_config.language = settings.language_code.clone();
                stt_config.start_timeout = settings.timing.stt_start_timeout();
                let mut tts_config = TtsConfig::new(
                    settings.tts_credential.clone(),
                    settings.tts_endpoint.clone(),
                    settings.tts_voice_id.clone(),
                );
                tts_config.language = settings.language_code.clone();
                tts_config.request_timeout = settings.timing.tts_request_timeout();

                let mut llm_config = LlmConfig::new(
                    settings.llm_credential.clone(),
                    settings.llm_endpoint.clone(),
                    settings.llm_model.clone(),
                );
                llm_config.request_timeout = settings.timing.llm_request_timeout();

                let deps = SessionDeps {
                    stt_upstream: stt_upstream.clone(),
                    stt_config,
                    llm_upstream: llm_upstream.clone(),
                    llm_config,
                    tts_upstream: tts_upstream.clone(),
                    tts_config,
                    timing: settings.timing.clone(),
                    clock: real_clock(),
                    metrics: metrics.clone(),
                    speaker_verifier: pipeline::const_true_verifier(),
                    shutdown: shutdown.clone(),
                };
                let high_watermark = settings.timing.backpressure_high_watermark_bytes;

                sessions.spawn(async move {
                    match transport::accept(stream, high_watermark).await {
                        Ok((reader, writer)) => pipeline::run(reader, writer, deps).await,
                        Err(e) => tracing::warn!(error = %e, "websocket handshake failed"),
                    }
                });
            }
        }
    }

    drop(listener);
    state_manager.transition(AppState::Stopping)?;

    let drain = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
        while sessions.join_next().await.is_some() {}
    });
    if drain.await.is_err() {
        tracing::warn!("shutdown grace period elapsed with sessions still active, aborting them");
        sessions.abort_all();
    }

    state_manager.transition(AppState::Stopped)?;
    Ok(())
}
