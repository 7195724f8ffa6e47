//! Playback sinks for the streaming consumer.
//!
//! The consumer is primed with the relay's fixed output format (S16LE mono)
//! before the first frame arrives, so the sink is constructed with the input
//! sample rate up front and converts to whatever the output device wants.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Failed to write audio data: {0}")]
    WriteError(String),

    #[error("Failed to stop audio playback: {0}")]
    StopError(String),

    #[error("Audio device error: {0}")]
    DeviceError(String),
}

/// Core trait for audio output handling. Data is S16LE mono PCM at the
/// sink's configured input rate.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Write audio data to the sink.
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError>;

    /// Stop audio playback and clear any buffered data
    async fn stop(&self) -> Result<(), AudioError>;
}

pub struct CpalConfig {
    /// Sample rate of the incoming PCM (the relay's fixed output rate)
    pub input_sample_rate: u32,
    /// Buffered-sample ceiling; `write` suspends until the device drains
    /// below it, so slow playback backpressures the caller's frame queue
    pub high_buffer_samples: usize,
}

impl Default for CpalConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 22050,
            high_buffer_samples: 22050 * 5, // 5 seconds of audio
        }
    }
}

enum AudioCommand {
    PlayAudio(Vec<u8>),
    Stop,
}

/// cpal-backed playback. A dedicated audio thread owns the output stream;
/// writes push samples onto a shared queue the device callback drains,
/// resampling by linear interpolation to the device rate.
pub struct CpalSink {
    audio_sender: Sender<AudioCommand>,
    buffered_samples: Arc<AtomicUsize>,
    config: CpalConfig,
    is_stopped: Arc<AtomicBool>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(config: CpalConfig) -> Result<Self, AudioError> {
        let (audio_sender, audio_receiver) = channel();
        let buffered_samples = Arc::new(AtomicUsize::new(0));
        let buffered_callback = Arc::clone(&buffered_samples);
        let buffered_thread = Arc::clone(&buffered_samples);
        let is_stopped = Arc::new(AtomicBool::new(false));

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            AudioError::DeviceError("No output device found".to_string())
        })?;
        log::debug!("Playback: Using output device: {:?}", device.name());

        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceError(e.to_string()))?;

        let output_sample_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;
        let input_sample_rate = config.input_sample_rate;

        let samples_queue: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let samples_queue_clone = Arc::clone(&samples_queue);

        let audio_thread = thread::spawn(move || {
            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = samples_queue_clone.lock().unwrap();

                    let output_frames = data.len() / output_channels;
                    let step = input_sample_rate as f32 / output_sample_rate as f32;
                    let needed = (output_frames as f32 * step).ceil() as usize;

                    let mut position: f32 = 0.0;
                    for frame in data.chunks_mut(output_channels) {
                        let sample = if queue.is_empty() {
                            0.0
                        } else {
                            let lower = position.floor() as usize;
                            let upper = lower + 1;
                            let fract = position.fract();
                            let a = queue.get(lower).copied().unwrap_or(0.0);
                            let b = queue.get(upper).copied().unwrap_or(0.0);
                            a * (1.0 - fract) + b * fract
                        };

                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }
                        position += step;
                    }

                    if needed <= queue.len() {
                        queue.drain(0..needed);
                    } else {
                        queue.clear();
                    }
                    buffered_callback.store(queue.len(), Ordering::Release);
                },
                move |err| {
                    log::error!("Playback: Stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Playback: Failed to create audio stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Playback: Failed to start audio stream: {}", e);
                return;
            }

            while let Ok(command) = audio_receiver.recv() {
                match command {
                    AudioCommand::PlayAudio(audio_data) => {
                        let mut queue = samples_queue.lock().unwrap();
                        for chunk in audio_data.chunks_exact(2) {
                            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                            queue.push(sample as f32 / i16::MAX as f32);
                        }
                        buffered_thread.store(queue.len(), Ordering::Release);
                    }
                    AudioCommand::Stop => break,
                }
            }
            // Stream dropped when the thread exits
        });

        Ok(Self {
            audio_sender,
            buffered_samples,
            config,
            is_stopped,
            audio_thread: Some(audio_thread),
        })
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffered_samples.load(Ordering::Acquire)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if !self.is_stopped.load(Ordering::Acquire) {
            let _ = self.audio_sender.send(AudioCommand::Stop);
        }
        if let Some(thread) = self.audio_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Failed to join audio thread: {:?}", e);
            }
        }
    }
}

/// Suspend until the device has drained the queue below `limit` samples.
/// Fails if the sink stops while waiting.
async fn wait_for_drain(
    buffered: &AtomicUsize,
    limit: usize,
    stopped: &AtomicBool,
) -> Result<(), AudioError> {
    while buffered.load(Ordering::Acquire) > limit {
        if stopped.load(Ordering::Acquire) {
            return Err(AudioError::WriteError("Sink is stopped".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

#[async_trait::async_trait]
impl AudioSink for CpalSink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
        if self.is_stopped.load(Ordering::Acquire) {
            return Err(AudioError::WriteError("Sink is stopped".to_string()));
        }

        // The queue is the only unbounded buffer on this path; holding the
        // caller here is what pushes backpressure up through its frame queue.
        let buffered = self.buffered_samples();
        if buffered > self.config.high_buffer_samples {
            log::debug!(
                "Playback: Buffer full ({} samples), waiting for device",
                buffered
            );
            wait_for_drain(
                &self.buffered_samples,
                self.config.high_buffer_samples,
                &self.is_stopped,
            )
            .await?;
        }

        self.audio_sender
            .send(AudioCommand::PlayAudio(audio_data.to_vec()))
            .map_err(|e| AudioError::WriteError(e.to_string()))?;

        log::debug!("Playback: Queued {} bytes", audio_data.len());
        Ok(())
    }

    async fn stop(&self) -> Result<(), AudioError> {
        self.is_stopped.store(true, Ordering::Release);
        self.audio_sender
            .send(AudioCommand::Stop)
            .map_err(|e| AudioError::StopError(e.to_string()))?;
        Ok(())
    }
}

/// Sink that discards audio, for headless runs and tests.
pub struct NullSink;

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), AudioError> {
        log::debug!("Playback: Discarding {} bytes (null sink)", audio_data.len());
        Ok(())
    }

    async fn stop(&self) -> Result<(), AudioError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_null_sink_accepts_writes() {
        let sink = NullSink;
        sink.write(&[0u8; 512]).await.unwrap();
        sink.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_drain_suspends_until_device_catches_up() {
        let buffered = Arc::new(AtomicUsize::new(1000));
        let stopped = AtomicBool::new(false);

        let counter = Arc::clone(&buffered);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            counter.store(10, Ordering::Release);
        });

        let start = Instant::now();
        wait_for_drain(&buffered, 100, &stopped).await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(80),
            "returned before the queue drained"
        );
    }

    #[tokio::test]
    async fn test_wait_for_drain_fails_when_stopped() {
        let buffered = AtomicUsize::new(1000);
        let stopped = AtomicBool::new(true);

        let result = wait_for_drain(&buffered, 100, &stopped).await;
        assert!(matches!(result, Err(AudioError::WriteError(_))));
    }

    #[tokio::test]
    async fn test_wait_for_drain_passes_through_below_limit() {
        let buffered = AtomicUsize::new(50);
        let stopped = AtomicBool::new(false);
        wait_for_drain(&buffered, 100, &stopped).await.unwrap();
    }

    #[cfg(feature = "test-audio")]
    #[tokio::test]
    async fn test_cpal_sink_plays_tone() -> Result<(), AudioError> {
        let sink = match CpalSink::new(CpalConfig::default()) {
            Ok(sink) => sink,
            Err(e) => {
                println!("Audio device not available in test environment: {}", e);
                return Ok(());
            }
        };

        // One second of 440Hz at 22050Hz mono
        let sample_rate = 22050u32;
        let mut samples = Vec::with_capacity(sample_rate as usize * 2);
        for i in 0..sample_rate {
            let t = i as f32 / sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            samples.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes());
        }

        sink.write(&samples).await?;
        sink.stop().await?;
        Ok(())
    }
}
