//! Streaming consumer for the relay's event stream.
//!
//! Symmetric to the session pipeline: reads one turn's events off the
//! WebSocket, hands decoded frames to a playback task through a bounded
//! queue, and starts playback on the first frame rather than waiting for
//! `audio_complete`. The event reader is the producer, the playback task the
//! consumer; the queue is their only shared state.

use crate::playback::AudioSink;
use crate::protocol::{decode_audio, AudioFormat, ProtocolError, RelayEvent, TurnRequest};
use futures_util::{SinkExt, Stream, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server reported error: {0}")]
    Turn(String),

    #[error("Connection closed before the turn completed")]
    Disconnected,

    #[error("Operation was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    /// Session id sent with the turn request; the server falls back to its
    /// configured default when absent.
    pub session_id: Option<String>,
    /// Bounded frame queue depth between event reader and playback task.
    pub queue_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/ws/process-voice".to_string(),
            session_id: Some("pi-001".to_string()),
            queue_depth: 8,
        }
    }
}

/// Everything one completed turn produced, for display and save-to-file.
/// The format metadata arrives last on the wire and is recorded here; live
/// playback is already primed with the pre-agreed format.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub transcript: Option<String>,
    pub reply: Option<String>,
    pub total_chunks: u32,
    pub format: Option<AudioFormat>,
    /// Concatenation of all frames in index order.
    pub audio: Vec<u8>,
}

/// Handoff between event reader and playback task.
enum PlaybackCommand {
    Frame(Vec<u8>),
    EndOfTurn,
}

pub struct StreamingClient {
    config: ClientConfig,
    sink: Arc<dyn AudioSink>,
}

impl StreamingClient {
    pub fn new(config: ClientConfig, sink: Arc<dyn AudioSink>) -> Self {
        Self { config, sink }
    }

    /// Run one full turn: send the audio, consume the event stream to its
    /// terminal event, playing frames as they arrive. A long-lived caller
    /// re-invokes this per turn.
    pub async fn run(
        &self,
        audio: &[u8],
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ClientError> {
        url::Url::parse(&self.config.server_url)?;
        let (ws_stream, _) = connect_async(self.config.server_url.as_str()).await?;
        let (mut write, read) = ws_stream.split();
        log::info!("Client: Connected to {}", self.config.server_url);

        let request = TurnRequest::new(audio, self.config.session_id.clone());
        let json = serde_json::to_string(&request).map_err(ProtocolError::from)?;
        write.send(Message::Text(json.into())).await?;
        log::info!("Client: Audio sent, waiting for response");

        let events = read.filter_map(|message| async {
            match message {
                Ok(Message::Text(text)) => {
                    Some(RelayEvent::parse(&text.to_string()).map_err(ClientError::from))
                }
                Ok(_) => None,
                Err(e) => Some(Err(ClientError::WebSocket(e))),
            }
        });
        tokio::pin!(events);

        self.consume_events(&mut events, cancel).await
    }

    /// Consume one turn's worth of events from any ordered event source.
    /// Split from the transport so the consumer logic is testable with
    /// scripted event feeds.
    pub async fn consume_events<S>(
        &self,
        events: &mut S,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ClientError>
    where
        S: Stream<Item = Result<RelayEvent, ClientError>> + Unpin,
    {
        let (frame_tx, mut frame_rx) = mpsc::channel::<PlaybackCommand>(self.config.queue_depth);

        // Dedicated playback task: dequeues in order, suspends when the
        // queue is empty, exits on the end-of-turn sentinel.
        let sink = Arc::clone(&self.sink);
        let playback = tokio::spawn(async move {
            let mut started = false;
            while let Some(command) = frame_rx.recv().await {
                match command {
                    PlaybackCommand::Frame(bytes) => {
                        if !started {
                            log::info!("Client: Starting playback");
                            started = true;
                        }
                        if let Err(e) = sink.write(&bytes).await {
                            log::error!("Client: Playback write failed: {}", e);
                            break;
                        }
                    }
                    PlaybackCommand::EndOfTurn => break,
                }
            }
        });

        let result = self.read_turn(events, &frame_tx, &cancel).await;

        // Always flush the sentinel so the playback task terminates, then
        // wait for it to drain what was already queued.
        let _ = frame_tx.send(PlaybackCommand::EndOfTurn).await;
        drop(frame_tx);
        if let Err(e) = playback.await {
            log::error!("Client: Playback task failed: {}", e);
        }

        result
    }

    async fn read_turn<S>(
        &self,
        events: &mut S,
        frame_tx: &mpsc::Sender<PlaybackCommand>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ClientError>
    where
        S: Stream<Item = Result<RelayEvent, ClientError>> + Unpin,
    {
        let mut outcome = TurnOutcome::default();

        loop {
            let event = tokio::select! {
                event = events.next() => event,
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            };

            match event {
                Some(Ok(RelayEvent::Transcription { text })) => {
                    log::info!("[Transcription] {}", text);
                    outcome.transcript = Some(text);
                }
                Some(Ok(RelayEvent::AiResponse { text })) => {
                    log::info!("[AI Response] {}", text);
                    outcome.reply = Some(text);
                }
                Some(Ok(RelayEvent::AudioChunk { data, index })) => {
                    // Delivery is index-ordered by the transport; no
                    // resequencing here.
                    let bytes = decode_audio(&data)?;
                    log::debug!("[Audio Chunk] {} ({} bytes)", index, bytes.len());
                    outcome.audio.extend_from_slice(&bytes);
                    outcome.total_chunks += 1;
                    if frame_tx
                        .send(PlaybackCommand::Frame(bytes))
                        .await
                        .is_err()
                    {
                        log::warn!("Client: Playback task gone, discarding audio");
                    }
                }
                Some(Ok(RelayEvent::AudioComplete {
                    total_chunks,
                    sample_rate,
                    channels,
                    sample_width,
                })) => {
                    log::info!("[Complete] Received {} chunks", total_chunks);
                    if total_chunks != outcome.total_chunks {
                        log::warn!(
                            "Client: Chunk count mismatch: server says {}, received {}",
                            total_chunks,
                            outcome.total_chunks
                        );
                    }
                    outcome.format = Some(AudioFormat {
                        sample_rate,
                        channels,
                        sample_width,
                    });
                    return Ok(outcome);
                }
                Some(Ok(RelayEvent::Error { message })) => {
                    // Aborted turn: buffered audio is incomplete, discard it.
                    log::error!("[Error] {}", message);
                    return Err(ClientError::Turn(message));
                }
                Some(Err(e)) => return Err(e),
                None => return Err(ClientError::Disconnected),
            }
        }
    }
}
