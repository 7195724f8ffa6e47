//! Streaming client: send a recorded utterance to the relay, play the
//! response as it arrives, and save the assembled audio to a WAV file.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use voice_relay_rs::{
    client::{ClientConfig, StreamingClient, TurnOutcome},
    playback::{AudioSink, CpalConfig, CpalSink, NullSink},
};

#[derive(Parser, Debug)]
#[command(name = "voice-client", about = "Streaming voice relay client")]
struct Args {
    /// Audio file to send (WAV or raw PCM bytes, forwarded verbatim)
    audio: PathBuf,

    /// Relay server WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8000/ws/process-voice")]
    url: String,

    /// Session id for the dialogue backend
    #[arg(long, default_value = "pi-001")]
    session: String,

    /// Where to save the assembled response audio
    #[arg(long, default_value = "response.wav")]
    save: PathBuf,

    /// Skip live playback, only save the response
    #[arg(long)]
    no_playback: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let audio = std::fs::read(&args.audio)
        .with_context(|| format!("Failed to read {}", args.audio.display()))?;

    let sink: Arc<dyn AudioSink> = if args.no_playback {
        Arc::new(NullSink)
    } else {
        match CpalSink::new(CpalConfig::default()) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                log::warn!("No audio device available ({}), playback disabled", e);
                Arc::new(NullSink)
            }
        }
    };

    let config = ClientConfig {
        server_url: args.url,
        session_id: Some(args.session),
        ..ClientConfig::default()
    };
    let client = StreamingClient::new(config, sink);

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_signal.cancel();
        }
    });

    let outcome = client.run(&audio, cancel).await?;

    if let Some(transcript) = &outcome.transcript {
        println!("You said: {}", transcript);
    }
    if let Some(reply) = &outcome.reply {
        println!("Assistant: {}", reply);
    }

    save_wav(&outcome, &args.save)?;
    println!("Response saved to {}", args.save.display());

    Ok(())
}

/// Write the assembled turn audio using the format parameters carried by
/// `audio_complete`.
fn save_wav(outcome: &TurnOutcome, path: &PathBuf) -> anyhow::Result<()> {
    let format = outcome
        .format
        .context("Turn completed without format metadata")?;

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.sample_width * 8,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for chunk in outcome.audio.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()?;

    Ok(())
}
