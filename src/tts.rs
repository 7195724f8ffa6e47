use futures_util::stream::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Streaming error: {0}")]
    Stream(String),
}

/// A lazy, finite sequence of S16LE PCM frames. The pipeline pulls frames one
/// at a time and forwards each before the next is produced.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SynthesisError>> + Send>>;

/// Text-to-speech capability consumed by the session pipeline.
#[async_trait::async_trait]
pub trait Synthesize: Send + Sync {
    /// Start synthesis for the given text, returning the frame stream.
    /// A failed engine start fails here; mid-utterance failures surface as
    /// stream items after partial output.
    async fn synthesize(&self, text: &str) -> Result<FrameStream, SynthesisError>;

    /// Fixed output sample rate for every frame this engine produces.
    fn sample_rate(&self) -> u32;
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub voice_id: String,
    pub model: String,
    pub sample_rate: u32,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(), // Rachel voice
            model: "eleven_multilingual_v2".to_string(),
            sample_rate: 22050,
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

/// ElevenLabs streaming synthesis, requesting raw PCM so chunks can be
/// relayed as they arrive instead of after the full utterance.
pub struct ElevenLabsTts {
    api_key: String,
    base_url: String,
    config: TtsConfig,
}

impl ElevenLabsTts {
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, TtsConfig::default())
    }

    pub fn with_config(api_key: String, config: TtsConfig) -> Self {
        Self {
            api_key,
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            config,
        }
    }
}

#[async_trait::async_trait]
impl Synthesize for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<FrameStream, SynthesisError> {
        let url = format!(
            "{}/text-to-speech/{}/stream?output_format=pcm_{}",
            self.base_url, self.config.voice_id, self.config.sample_rate
        );

        let payload = json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
            }
        });

        let response = crate::http::streaming_client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SynthesisError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        log::debug!("TTS: Synthesis stream started for {} chars", text.len());
        Ok(align_frames(response.bytes_stream().map(
            |chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(SynthesisError::Stream(e.to_string())),
            },
        )))
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

/// Re-frame an arbitrary byte stream so every yielded frame holds whole
/// 16-bit samples. Network chunk boundaries don't respect sample boundaries;
/// a trailing odd byte is carried into the next frame.
pub fn align_frames<S>(input: S) -> FrameStream
where
    S: Stream<Item = Result<Vec<u8>, SynthesisError>> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut carry: Option<u8> = None;
        futures_util::pin_mut!(input);

        while let Some(chunk) = input.next().await {
            let chunk = chunk?;
            let mut frame = Vec::with_capacity(chunk.len() + 1);
            if let Some(byte) = carry.take() {
                frame.push(byte);
            }
            frame.extend_from_slice(&chunk);

            if frame.len() % 2 != 0 {
                carry = frame.pop();
            }
            if !frame.is_empty() {
                yield frame;
            }
        }

        if let Some(byte) = carry {
            // A dangling byte means the engine truncated mid-sample.
            log::warn!("TTS: Dropping trailing odd byte {:#04x}", byte);
        }
    })
}
