//! # Streaming Consumer Tests
//!
//! Feeds scripted event sequences to the client's consumer loop and checks
//! playback handoff, turn outcomes, and error behavior against an in-memory
//! sink. No network or audio devices involved.

use async_trait::async_trait;
use futures_util::stream;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use voice_relay_rs::client::{ClientConfig, ClientError, StreamingClient};
use voice_relay_rs::playback::{AudioError, AudioSink};
use voice_relay_rs::protocol::RelayEvent;

/// Records every frame written, optionally throttling to simulate a slow
/// playback device.
struct MemorySink {
    frames: Mutex<Vec<Vec<u8>>>,
    write_delay: Duration,
}

impl MemorySink {
    fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            write_delay: Duration::ZERO,
        }
    }

    fn slow(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Self::new()
        }
    }

    fn written(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for MemorySink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.frames.lock().unwrap().push(audio_data.to_vec());
        Ok(())
    }

    async fn stop(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

fn client_with(sink: Arc<MemorySink>, queue_depth: usize) -> StreamingClient {
    let config = ClientConfig {
        queue_depth,
        ..ClientConfig::default()
    };
    StreamingClient::new(config, sink)
}

fn complete(total_chunks: u32) -> RelayEvent {
    RelayEvent::AudioComplete {
        total_chunks,
        sample_rate: 22050,
        channels: 1,
        sample_width: 2,
    }
}

fn full_turn_events(frames: &[Vec<u8>]) -> Vec<Result<RelayEvent, ClientError>> {
    let mut events = vec![
        Ok(RelayEvent::Transcription {
            text: "turn on the lights".to_string(),
        }),
        Ok(RelayEvent::AiResponse {
            text: "Lights are on.".to_string(),
        }),
    ];
    for (i, frame) in frames.iter().enumerate() {
        events.push(Ok(RelayEvent::chunk(frame, i as u32)));
    }
    events.push(Ok(complete(frames.len() as u32)));
    events
}

#[tokio::test]
async fn test_full_turn_plays_frames_in_order() {
    let frames = vec![vec![1u8; 4096], vec![2u8; 4096], vec![3u8; 2048]];
    let sink = Arc::new(MemorySink::new());
    let client = client_with(Arc::clone(&sink), 8);

    let mut events = stream::iter(full_turn_events(&frames));
    let outcome = client
        .consume_events(&mut events, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.transcript.as_deref(), Some("turn on the lights"));
    assert_eq!(outcome.reply.as_deref(), Some("Lights are on."));
    assert_eq!(outcome.total_chunks, 3);

    let format = outcome.format.unwrap();
    assert_eq!(format.sample_rate, 22050);
    assert_eq!(format.channels, 1);
    assert_eq!(format.sample_width, 2);

    // The sink saw exactly the decoded frames, in arrival order.
    assert_eq!(sink.written(), frames);

    // And the assembled audio reconstructs the utterance byte-for-byte.
    let expected: Vec<u8> = frames.into_iter().flatten().collect();
    assert_eq!(outcome.audio, expected);
}

#[tokio::test]
async fn test_zero_chunk_turn_completes() {
    let sink = Arc::new(MemorySink::new());
    let client = client_with(Arc::clone(&sink), 8);

    let mut events = stream::iter(full_turn_events(&[]));
    let outcome = client
        .consume_events(&mut events, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.total_chunks, 0);
    assert!(outcome.audio.is_empty());
    assert!(sink.written().is_empty());
}

#[tokio::test]
async fn test_error_before_audio_discards_turn() {
    let sink = Arc::new(MemorySink::new());
    let client = client_with(Arc::clone(&sink), 8);

    let mut events = stream::iter(vec![
        Ok(RelayEvent::Transcription {
            text: "turn on the lights".to_string(),
        }),
        Ok(RelayEvent::error("Dialogue failed: timeout")),
    ]);

    let result = client
        .consume_events(&mut events, CancellationToken::new())
        .await;
    match result {
        Err(ClientError::Turn(message)) => assert!(message.contains("Dialogue failed")),
        other => panic!("Expected turn error, got {:?}", other),
    }
    assert!(sink.written().is_empty());
}

#[tokio::test]
async fn test_error_mid_audio_stops_enqueuing() {
    let sink = Arc::new(MemorySink::new());
    let client = client_with(Arc::clone(&sink), 8);

    let mut events = stream::iter(vec![
        Ok(RelayEvent::Transcription {
            text: "hi".to_string(),
        }),
        Ok(RelayEvent::AiResponse {
            text: "ok".to_string(),
        }),
        Ok(RelayEvent::chunk(&[1u8; 64], 0)),
        Ok(RelayEvent::error("Synthesis failed: engine died")),
        // Nothing after the terminal error is ever read.
        Ok(RelayEvent::chunk(&[2u8; 64], 1)),
    ]);

    let result = client
        .consume_events(&mut events, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ClientError::Turn(_))));

    // The frame streamed before the failure may already have played; the
    // one after the error must not.
    let written = sink.written();
    assert!(written.len() <= 1);
    assert!(!written.contains(&vec![2u8; 64]));
}

#[tokio::test]
async fn test_stream_ending_without_terminal_event() {
    let sink = Arc::new(MemorySink::new());
    let client = client_with(Arc::clone(&sink), 8);

    let mut events = stream::iter(vec![Ok(RelayEvent::Transcription {
        text: "hi".to_string(),
    })]);

    let result = client
        .consume_events(&mut events, CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ClientError::Disconnected)));
}

#[tokio::test]
async fn test_cancellation_aborts_turn() {
    let sink = Arc::new(MemorySink::new());
    let client = client_with(Arc::clone(&sink), 8);

    let cancel = CancellationToken::new();
    cancel.cancel();

    // A pending stream that never yields; only cancellation can end this.
    let mut events = stream::pending::<Result<RelayEvent, ClientError>>();
    let result = client.consume_events(&mut events, cancel).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));
}

#[tokio::test]
async fn test_slow_sink_applies_backpressure_without_loss() {
    // Queue depth 1 with a throttled sink: the reader must suspend rather
    // than drop frames.
    let sink = Arc::new(MemorySink::slow(Duration::from_millis(10)));
    let client = client_with(Arc::clone(&sink), 1);

    let frames: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 32]).collect();
    let mut events = stream::iter(full_turn_events(&frames));
    let outcome = client
        .consume_events(&mut events, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.total_chunks, 20);
    assert_eq!(sink.written(), frames);
}
