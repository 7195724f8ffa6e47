//! WebSocket front door for the relay.
//!
//! One task per connection. Each connection gets a bounded event channel
//! feeding a single writer task, so events reach the wire in exactly the
//! order the pipeline emitted them. The reader loop drives one turn at a
//! time; the next inbound message is not read until the previous turn hit
//! its terminal event.

use crate::pipeline::SessionPipeline;
use crate::protocol::RelayEvent;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Depth of the per-connection event channel. Synthesis suspends when the
/// socket can't drain chunks fast enough.
const EVENT_CHANNEL_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
        }
    }
}

pub struct RelayServer {
    config: ServerConfig,
    pipeline: Arc<SessionPipeline>,
}

impl RelayServer {
    pub fn new(config: ServerConfig, pipeline: Arc<SessionPipeline>) -> Self {
        Self { config, pipeline }
    }

    /// Bind the configured address and accept connections until `shutdown`
    /// fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already-bound listener. Each connection runs
    /// its own pipeline loop; a failure on one connection never touches
    /// another.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("Relay server listening on {}", addr);
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            log::info!("Connection from {}", addr);
                            let pipeline = Arc::clone(&self.pipeline);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                match handle_connection(stream, pipeline, shutdown).await {
                                    Ok(()) => log::info!("Connection {} closed cleanly", addr),
                                    Err(e) => log::warn!("Connection {} ended: {}", addr, e),
                                }
                            });
                        }
                        Err(e) => {
                            log::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    log::info!("Relay server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    pipeline: Arc<SessionPipeline>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (event_tx, mut event_rx) = mpsc::channel::<RelayEvent>(EVENT_CHANNEL_DEPTH);

    // Single writer task: the one ordered channel to this caller.
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    log::error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if write.send(Message::Text(json.into())).await.is_err() {
                // Caller went away; drain nothing further.
                break;
            }
        }
        let _ = write.close().await;
    });

    // Reader loop: strictly one turn at a time, in arrival order.
    loop {
        let message = tokio::select! {
            message = read.next() => message,
            _ = shutdown.cancelled() => break,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let text = text.to_string();
                let end = pipeline.handle_message(&text, &event_tx).await;
                log::debug!("Turn ended: {:?}", end);
                if end == crate::pipeline::TurnEnd::Disconnected {
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                let event = RelayEvent::error("Expected a JSON text message");
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                log::info!("Caller closed connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong handled by tungstenite.
            }
            Some(Err(e)) => {
                log::warn!("WebSocket error: {}", e);
                break;
            }
            None => break,
        }
    }

    // Dropping the sender lets the writer drain queued events and exit.
    drop(event_tx);
    let _ = writer.await;

    Ok(())
}
