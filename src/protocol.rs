//! Wire protocol for the voice relay.
//!
//! One JSON text message per inbound turn, followed by an ordered sequence of
//! JSON events back to the caller. Binary audio travels base64-encoded inside
//! the JSON control plane.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid base64 audio payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// Inbound request, one per turn: `{ "audio": "<base64>", "sessionId": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub audio: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TurnRequest {
    /// Build a request from raw audio bytes.
    pub fn new(audio: &[u8], session_id: Option<String>) -> Self {
        Self {
            audio: Some(encode_audio(audio)),
            session_id,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decode the base64 audio payload. Absent or empty audio is a
    /// `MissingField` error; the turn never starts in that case.
    pub fn decode_audio(&self) -> Result<Vec<u8>, ProtocolError> {
        let encoded = self
            .audio
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(ProtocolError::MissingField("audio"))?;
        let bytes = BASE64.decode(encoded)?;
        if bytes.is_empty() {
            return Err(ProtocolError::MissingField("audio"));
        }
        Ok(bytes)
    }
}

/// Outbound events, tagged by `type` on the wire.
///
/// Per turn the server emits one `transcription`, at most one `ai_response`,
/// zero or more `audio_chunk` with gap-free increasing indices, and exactly
/// one of `audio_complete` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Transcription {
        text: String,
    },
    AiResponse {
        text: String,
    },
    AudioChunk {
        data: String,
        index: u32,
    },
    AudioComplete {
        total_chunks: u32,
        sample_rate: u32,
        channels: u16,
        sample_width: u16,
    },
    Error {
        message: String,
    },
}

impl RelayEvent {
    pub fn error(message: impl Into<String>) -> Self {
        RelayEvent::Error {
            message: message.into(),
        }
    }

    pub fn chunk(frame: &[u8], index: u32) -> Self {
        RelayEvent::AudioChunk {
            data: encode_audio(frame),
            index,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Terminal events end the current turn.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayEvent::AudioComplete { .. } | RelayEvent::Error { .. }
        )
    }
}

/// Fixed output format parameters, carried by `audio_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
}

impl AudioFormat {
    /// S16LE mono at the given rate.
    pub fn mono_s16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            sample_width: 2,
        }
    }
}

pub fn encode_audio(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_audio(encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    Ok(BASE64.decode(encoded)?)
}
