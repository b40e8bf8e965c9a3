//! Lifecycle wrapper around one upstream STT connection.
//!
//! Lazy creation on first audio frame, a startup lock so
//! concurrent frames never spin up two upstreams, a 10 s startup timeout,
//! and abrupt, idempotent teardown for the echo-prevention discipline (the
//! Session Controller calls [`SttSession::close`] the instant it leaves
//! `listening`).

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::SttResult;
use crate::types::{SttConfig, SttEvent};
use crate::upstream::{SttConnection, SttUpstream};

enum ConnectionState {
    Absent,
    Starting,
    Active(Box<dyn SttConnection>),
}

/// One session's binding to the streaming STT upstream.
///
/// Cheap to construct; the actual upstream connection is opened lazily by
/// the first [`SttSession::push_frame`] call. Safe to share via `Arc` and
/// call concurrently — the internal lock guarantees at most one upstream
/// is ever being started or active at a time.
pub struct SttSession {
    upstream: Arc<dyn SttUpstream>,
    config: SttConfig,
    state: Mutex<ConnectionState>,
}

impl SttSession {
    pub fn new(upstream: Arc<dyn SttUpstream>, config: SttConfig) -> Self {
        Self {
            upstream,
            config,
            state: Mutex::new(ConnectionState::Absent),
        }
    }

    /// Forward one raw PCM frame upstream, lazily starting the connection
    /// if this is the first frame since the last [`close`](Self::close).
    ///
    /// A frame that arrives while another call is already starting the
    /// upstream is dropped rather than spinning up a second connection —
    /// this is what keeps at most one upstream bound at any instant,
    /// even under concurrent pushes.
    pub async fn push_frame(
        &self,
        pcm: &[u8],
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> SttResult<()> {
        {
            let mut guard = self.state.lock().await;
            match &*guard {
                ConnectionState::Active(_) => {}
                ConnectionState::Starting => return Ok(()),
                ConnectionState::Absent => {
                    *guard = ConnectionState::Starting;
                    drop(guard);
                    let started =
                        tokio::time::timeout(self.config.start_timeout, self.upstream.connect(&self.config, events))
                            .await;
                    let mut guard = self.state.lock().await;
                    // `close` may have run while this connect was in flight
                    // (frames are pushed from a spawned task, concurrently
                    // with the Controller tearing the session down). If the
                    // slot we reserved isn't `Starting` anymore, this result
                    // is stale: don't resurrect a connection the Controller
                    // already asked to destroy.
                    if !matches!(&*guard, ConnectionState::Starting) {
                        if let Ok(Ok(mut conn)) = started {
                            let _ = conn.close().await;
                        }
                        return Ok(());
                    }
                    match started {
                        Ok(Ok(conn)) => *guard = ConnectionState::Active(conn),
                        Ok(Err(e)) => {
                            *guard = ConnectionState::Absent;
                            return Err(e);
                        }
                        Err(_) => {
                            *guard = ConnectionState::Absent;
                            return Err(dolores_foundation::error::SttError::StartTimeout(
                                self.config.start_timeout,
                            ));
                        }
                    }
                }
            }
        }

        let mut guard = self.state.lock().await;
        if let ConnectionState::Active(conn) = &mut *guard {
            conn.send_frame(pcm).await
        } else {
            Ok(())
        }
    }

    /// Tear down the upstream connection, if any. Idempotent: calling this
    /// on an already-`Absent` session is a no-op.
    pub async fn close(&self) {
        let previous = {
            let mut guard = self.state.lock().await;
            std::mem::replace(&mut *guard, ConnectionState::Absent)
        };
        if let ConnectionState::Active(mut conn) = previous {
            let _ = conn.close().await;
        }
    }

    pub async fn is_active(&self) -> bool {
        matches!(&*self.state.lock().await, ConnectionState::Active(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUpstream {
        connects: Arc<AtomicUsize>,
    }

    struct CountingConnection;

    #[async_trait]
    impl SttConnection for CountingConnection {
        async fn send_frame(&mut self, _pcm: &[u8]) -> SttResult<()> {
            Ok(())
        }
        async fn close(&mut self) -> SttResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SttUpstream for CountingUpstream {
        async fn connect(
            &self,
            _config: &SttConfig,
            _events: mpsc::UnboundedSender<SttEvent>,
        ) -> SttResult<Box<dyn SttConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Box::new(CountingConnection))
        }
    }

    #[tokio::test]
    async fn concurrent_pushes_open_at_most_one_upstream() {
        let connects = Arc::new(AtomicUsize::new(0));
        let upstream = Arc::new(CountingUpstream {
            connects: connects.clone(),
        });
        let session = Arc::new(SttSession::new(
            upstream,
            SttConfig::new("cred", "wss://example.invalid"),
        ));

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let session = session.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(
                async move { session.push_frame(&[0u8; 4], tx).await },
            ));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_resets_to_absent() {
        let upstream = Arc::new(CountingUpstream {
            connects: Arc::new(AtomicUsize::new(0)),
        });
        let session = SttSession::new(upstream, SttConfig::new("cred", "wss://example.invalid"));
        session.close().await;
        session.close().await;
        assert!(!session.is_active().await);
    }
}
