//! Wire message shapes for the client/server transport.

use serde::{Deserialize, Serialize};

use crate::pipeline::session::SessionState;

/// Inbound messages from the voice client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One microphone chunk, base64-encoded PCM S16LE / 16 kHz / mono.
    Audio { data: String },
    /// The client finished playing the last `audio_end` turn.
    PlaybackDone,
    /// Barge-in: the user started speaking during `speaking`.
    Interrupt,
    /// Liveness probe.
    Ping,
}

/// Outbound messages to the voice client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One-shot descriptor sent immediately on connect.
    Config {
        version: u32,
        stt: String,
        tts: String,
        #[serde(rename = "speakerVerification")]
        speaker_verification: bool,
        backend: String,
    },
    State {
        state: SessionState,
    },
    Transcript {
        text: String,
    },
    Audio {
        format: &'static str,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        data: String,
        index: u64,
    },
    AudioEnd,
    Error {
        error: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn audio(data_base64: String, index: u64) -> Self {
        ServerMessage::Audio {
            format: "pcm_s16le",
            sample_rate: 16_000,
            channels: 1,
            data: data_base64,
            index,
        }
    }
}
