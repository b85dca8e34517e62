//! Wire event protocol
//!
//! Events travel over a persistent bidirectional socket. JSON text messages
//! carry every event except `pcm_frame`, which is sent as a single raw binary
//! message of exactly one frame. Inbound binary audio rides base64 inside the
//! JSON payload.
//!
//! Legacy event names from earlier clients are accepted as aliases and routed
//! to the canonical names here, at the protocol edge.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Events received from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Idle -> Listening; clears the ingest buffer.
    StartVoiceRecording,
    /// Append audio to the ingest buffer while Listening.
    #[serde(alias = "audio_chunk")]
    VoiceChunk {
        /// Base64-encoded audio bytes.
        data: String,
        format: String,
    },
    /// Replace the ingest buffer and transcribe immediately.
    VoiceData { data: String, format: String },
    /// Listening -> Transcribing.
    StopVoiceRecording,
    /// Listening -> Idle, discarding buffered audio.
    CancelVoiceInput,
    /// Idle -> Thinking with a typed user turn.
    ConversationTextInput { text: String },
    /// Start (or replace) a direct speech stream; does not touch memory.
    #[serde(alias = "synthesize_speech_streaming")]
    StartTts {
        text: String,
        #[serde(default)]
        voice_id: Option<String>,
    },
    /// Cancel the active speech stream.
    StopTts,
    /// Client playback buffer report; feeds adaptive pacing, never surfaced.
    AudioBufferStatus {
        buffer_frames: u32,
        underrun_count: u64,
    },
    /// Liveness ping; acked, refreshes activity.
    #[serde(alias = "client_heartbeat")]
    Heartbeat { t: i64 },
    /// Reset conversation memory, preserving the system directive.
    ClearConversation,
}

/// Events sent to a client.
///
/// `PcmFrame` is never serialized as JSON; the router sends it as a binary
/// message and must match it before serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundEvent {
    ConversationReady,
    VoiceRecordingStarted,
    TranscriptionStarted,
    TranscriptionComplete {
        text: String,
    },
    TranscriptionError {
        error: String,
        kind: ErrorKind,
    },
    AiThinking,
    AiResponseComplete {
        text: String,
    },
    TtsStarted {
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_frames: Option<u64>,
    },
    #[serde(skip)]
    PcmFrame(Vec<u8>),
    TtsCompleted {
        frames: u64,
        bytes: u64,
        duration_ms: u64,
    },
    TtsError {
        error: String,
        kind: ErrorKind,
    },
    HeartbeatAck {
        t: i64,
    },
    ConversationCleared,
}

impl OutboundEvent {
    /// Whether this event travels as a raw binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::PcmFrame(_))
    }
}
