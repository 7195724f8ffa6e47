//! Per-connection session pipeline.
//!
//! Drives one inbound audio message through transcription, dialogue, and
//! synthesis, emitting the event sequence of the wire protocol as each stage
//! completes. Synthesis frames are forwarded as they are produced; the
//! pipeline never materializes the full utterance before the first chunk
//! goes out. Any stage failure ends the turn with a single `error` event and
//! leaves the connection usable for the next turn.

use crate::dialogue::Converse;
use crate::protocol::{ProtocolError, RelayEvent, TurnRequest};
use crate::stt::Transcribe;
use crate::tts::Synthesize;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One pipeline instance owns one connection for its lifetime. The adapter
/// handles are process-wide and shared read-only across connections.
pub struct SessionPipeline {
    stt: Arc<dyn Transcribe>,
    dialogue: Arc<dyn Converse>,
    tts: Arc<dyn Synthesize>,
    default_session_id: String,
}

/// How a turn ended. `Disconnected` means the event channel closed under us
/// (caller went away mid-turn); there is nobody left to send events to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    Complete,
    Failed,
    Disconnected,
}

impl SessionPipeline {
    pub fn new(
        stt: Arc<dyn Transcribe>,
        dialogue: Arc<dyn Converse>,
        tts: Arc<dyn Synthesize>,
        default_session_id: String,
    ) -> Self {
        Self {
            stt,
            dialogue,
            tts,
            default_session_id,
        }
    }

    /// Process one inbound message as one turn, emitting events in order on
    /// `events`. Returns once the turn reaches its terminal event; callers
    /// must not feed the next message before then.
    pub async fn handle_message(&self, raw: &str, events: &mpsc::Sender<RelayEvent>) -> TurnEnd {
        // Validation failures never start a turn; the connection stays open.
        let (audio, session_id) = match self.validate(raw) {
            Ok(parts) => parts,
            Err(message) => {
                log::warn!("Pipeline: Rejected inbound message: {}", message);
                return self.fail(events, message).await;
            }
        };

        // Step 1: Transcription
        let transcript = match self.stt.transcribe(&audio).await {
            Ok(text) => text,
            Err(e) => {
                log::error!("Pipeline: Transcription failed: {}", e);
                return self.fail(events, format!("Transcription failed: {}", e)).await;
            }
        };
        if !self
            .emit(events, RelayEvent::Transcription {
                text: transcript.clone(),
            })
            .await
        {
            return TurnEnd::Disconnected;
        }

        // Step 2: Dialogue
        let reply = match self.dialogue.converse(&transcript, &session_id).await {
            Ok(text) => text,
            Err(e) => {
                log::error!("Pipeline: Dialogue failed: {}", e);
                return self.fail(events, format!("Dialogue failed: {}", e)).await;
            }
        };
        if !self
            .emit(events, RelayEvent::AiResponse { text: reply.clone() })
            .await
        {
            return TurnEnd::Disconnected;
        }

        // Step 3: Synthesis, interleaved with delivery
        let mut frames = match self.tts.synthesize(&reply).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Pipeline: Synthesis failed to start: {}", e);
                return self.fail(events, format!("Synthesis failed: {}", e)).await;
            }
        };

        let mut index: u32 = 0;
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => {
                    if !self.emit(events, RelayEvent::chunk(&frame, index)).await {
                        return TurnEnd::Disconnected;
                    }
                    index += 1;
                }
                Err(e) => {
                    // Chunks already sent stay valid; the error event is the
                    // turn's terminal event.
                    log::error!("Pipeline: Synthesis failed after {} chunks: {}", index, e);
                    return self.fail(events, format!("Synthesis failed: {}", e)).await;
                }
            }
        }

        let complete = RelayEvent::AudioComplete {
            total_chunks: index,
            sample_rate: self.tts.sample_rate(),
            channels: 1,
            sample_width: 2,
        };
        if !self.emit(events, complete).await {
            return TurnEnd::Disconnected;
        }

        log::info!("Pipeline: Turn complete ({} chunks)", index);
        TurnEnd::Complete
    }

    /// Parse and validate the inbound message, resolving the session id.
    fn validate(&self, raw: &str) -> Result<(Vec<u8>, String), String> {
        let request =
            TurnRequest::parse(raw).map_err(|e| format!("Invalid turn request: {}", e))?;

        let audio = request.decode_audio().map_err(|e| match e {
            ProtocolError::MissingField(_) => "Missing or empty 'audio' field".to_string(),
            other => format!("Invalid turn request: {}", other),
        })?;

        let session_id = request
            .session_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.default_session_id.clone());

        Ok((audio, session_id))
    }

    async fn fail(&self, events: &mpsc::Sender<RelayEvent>, message: String) -> TurnEnd {
        if self.emit(events, RelayEvent::error(message)).await {
            TurnEnd::Failed
        } else {
            TurnEnd::Disconnected
        }
    }

    /// Send one event downstream. A closed channel means the caller
    /// disconnected; the turn is abandoned without further stages.
    async fn emit(&self, events: &mpsc::Sender<RelayEvent>, event: RelayEvent) -> bool {
        if events.send(event).await.is_err() {
            log::info!("Pipeline: Connection closed mid-turn, aborting");
            false
        } else {
            true
        }
    }
}
