use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use voice_relay_rs::{
    config::load_config,
    dialogue::WebhookDialogue,
    error::Result as RelayResult,
    pipeline::SessionPipeline,
    server::{RelayServer, ServerConfig},
    stt::GroqStt,
    tts::ElevenLabsTts,
};

#[derive(Parser, Debug)]
#[command(name = "voice-relay", about = "Streaming voice relay server")]
struct Args {
    /// Bind address, overriding RELAY_BIND_ADDR
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> RelayResult<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config()?;
    log::info!("🚀 Initializing voice-relay-rs");

    let stt = Arc::new(GroqStt::new(config.groq_key().to_string()));
    let dialogue = Arc::new(WebhookDialogue::new(config.dialogue_webhook_url.clone()));
    let tts = Arc::new(ElevenLabsTts::new(config.elevenlabs_key().to_string()));

    let pipeline = Arc::new(SessionPipeline::new(
        stt,
        dialogue,
        tts,
        config.default_session_id.clone(),
    ));
    log::info!("🔊 Pipeline initialized");

    let server_config = ServerConfig {
        bind_address: args.bind.unwrap_or(config.bind_address),
    };
    let server = RelayServer::new(server_config, pipeline);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, shutting down...");
            shutdown_signal.cancel();
        }
    });

    server.run(shutdown).await?;
    Ok(())
}
