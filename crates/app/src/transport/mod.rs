//! Bidirectional, message-framed, ordered transport per client connection.
//! Accepts a websocket connection, splits it into an inbound
//! reader and an outbound writer, and enforces the send-side backpressure
//! high-watermark before every outbound send.

pub mod messages;

pub use messages::{ClientMessage, ServerMessage};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use dolores_foundation::error::TransportError;

type Sink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>;
type Source = futures_util::stream::SplitStream<WebSocketStream<TcpStream>>;

/// One queued outbound frame, paired with the byte count it was charged
/// against `buffered_bytes` so the writer task can release exactly that
/// many bytes once the frame is actually flushed.
enum Outbound {
    Frame(Message, u64),
    Close,
}

/// Accepts a raw TCP connection as a websocket and splits it into a
/// [`TransportReader`]/[`TransportWriter`] pair.
///
/// The writer half owns the socket sink exclusively via a dedicated task:
/// `TransportWriter::send` only enqueues a frame and returns, so
/// `buffered_bytes` reflects bytes actually sitting unflushed ahead of a
/// slow or stalled client, not just the one message currently in flight.
pub async fn accept(
    stream: TcpStream,
    high_watermark_bytes: u64,
) -> Result<(TransportReader, TransportWriter), TransportError> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| TransportError::Socket(e.to_string()))?;
    let (sink, source) = ws.split();
    let buffered_bytes = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let (outbox, outbox_rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(sink, outbox_rx, buffered_bytes.clone(), closed.clone()));

    Ok((
        TransportReader { source },
        TransportWriter {
            outbox,
            buffered_bytes,
            closed,
            high_watermark_bytes,
        },
    ))
}

/// Drains queued frames in order, one at a time, onto the real socket sink.
/// `buffered_bytes` only drops once a frame's `send` has actually completed
/// (or failed), so a client that stops reading causes this loop to stall
/// on `sink.send(...)` with the backlog still charged against the watermark.
async fn write_loop(
    mut sink: Sink,
    mut outbox_rx: mpsc::UnboundedReceiver<Outbound>,
    buffered_bytes: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
) {
    while let Some(item) = outbox_rx.recv().await {
        match item {
            Outbound::Frame(message, size) => {
                let result = sink.send(message).await;
                buffered_bytes.fetch_sub(size, Ordering::Relaxed);
                if result.is_err() {
                    closed.store(true, Ordering::Relaxed);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = sink.close().await;
}

/// The inbound half. Owned by the session actor's read loop.
pub struct TransportReader {
    source: Source,
}

impl TransportReader {
    /// Reads the next client message. `None` means the connection closed.
    /// A malformed or unrecognized frame yields `Some(Err(..))` without
    /// closing the connection.
    pub async fn recv(&mut self) -> Option<Result<ClientMessage, TransportError>> {
        loop {
            let next = self.source.next().await?;
            return Some(match next {
                Ok(Message::Text(text)) => serde_json::from_str(&text)
                    .map_err(|e| TransportError::MalformedMessage(e.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(other) => Err(TransportError::UnknownMessageType(format!("{other:?}"))),
                Err(e) => Err(TransportError::Socket(e.to_string())),
            });
        }
    }
}

/// The outbound half. Cheaply cloneable (an `Arc` around the shared
/// counters and a sender onto the write-loop task's channel) so both the
/// Session Controller (`state`/`transcript`/`error`/`pong`) and the
/// Ordered Audio Emitter (`audio`/`audio_end`) can hold one without
/// juggling a single owner.
#[derive(Clone)]
pub struct TransportWriter {
    outbox: mpsc::UnboundedSender<Outbound>,
    buffered_bytes: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    high_watermark_bytes: u64,
}

impl TransportWriter {
    /// Enqueues one message, checking the backpressure high-watermark
    /// against bytes actually unflushed ahead of it first. Never buffers
    /// past the watermark: the caller should treat
    /// `Err(TransportError::BackpressureExceeded)` as "close the
    /// connection", never as "retry" or "drop silently". Returns as soon
    /// as the frame is queued — the actual socket write happens on the
    /// write-loop task, so a stalled client never blocks this call.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }

        let payload = serde_json::to_string(message)
            .map_err(|e| TransportError::MalformedMessage(e.to_string()))?;
        let size = payload.len() as u64;

        let projected = self.buffered_bytes.fetch_add(size, Ordering::Relaxed) + size;
        if projected > self.high_watermark_bytes {
            self.buffered_bytes.fetch_sub(size, Ordering::Relaxed);
            return Err(TransportError::BackpressureExceeded {
                buffered: projected as usize,
            });
        }

        if self.outbox.send(Outbound::Frame(Message::Text(payload), size)).is_err() {
            self.buffered_bytes.fetch_sub(size, Ordering::Relaxed);
            self.closed.store(true, Ordering::Relaxed);
            return Err(TransportError::Closed);
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.outbox.send(Outbound::Close);
    }
}
