//! Scriptable fakes for exercising Session Controller logic without a real
//! upstream connection. Used by the app crate's pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SttResult;
use crate::types::{SttConfig, SttEvent};
use crate::upstream::{SttConnection, SttUpstream};

/// An upstream that replays a fixed sequence of events on every connect,
/// and counts how many times a connection was opened and how many frames
/// were pushed to it.
pub struct ScriptedSttUpstream {
    script: Vec<SttEvent>,
    pub connect_count: Arc<AtomicUsize>,
    pub frames_sent: Arc<AtomicUsize>,
}

impl ScriptedSttUpstream {
    pub fn new(script: Vec<SttEvent>) -> Self {
        Self {
            script,
            connect_count: Arc::new(AtomicUsize::new(0)),
            frames_sent: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct ScriptedConnection {
    frames_sent: Arc<AtomicUsize>,
}

#[async_trait]
impl SttConnection for ScriptedConnection {
    async fn send_frame(&mut self, _pcm: &[u8]) -> SttResult<()> {
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> SttResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SttUpstream for ScriptedSttUpstream {
    async fn connect(
        &self,
        _config: &SttConfig,
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> SttResult<Box<dyn SttConnection>> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        for event in self.script.clone() {
            let _ = events.send(event);
        }
        Ok(Box::new(ScriptedConnection {
            frames_sent: self.frames_sent.clone(),
        }))
    }
}
