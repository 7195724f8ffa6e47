use crate::http;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Response parsing error: {0}")]
    ParseError(String),
}

/// Speech-to-text capability consumed by the session pipeline.
#[async_trait::async_trait]
pub trait Transcribe: Send + Sync {
    /// Transcribe one utterance of raw audio bytes to text.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError>;
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub model: String,
    pub language: Option<String>,
    pub temperature: Option<f32>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "whisper-large-v3-turbo".to_string(),
            language: None, // Let it transcribe naturally
            temperature: Some(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Groq Whisper transcription over the OpenAI-compatible endpoint.
pub struct GroqStt {
    api_key: String,
    base_url: String,
    config: SttConfig,
}

impl GroqStt {
    pub fn new(api_key: String) -> Self {
        Self::with_config(api_key, SttConfig::default())
    }

    pub fn with_config(api_key: String, config: SttConfig) -> Self {
        Self {
            api_key,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            config,
        }
    }
}

#[async_trait::async_trait]
impl Transcribe for GroqStt {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, TranscriptionError> {
        let url = format!("{}/audio/transcriptions", self.base_url);

        let file_part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone());

        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }
        if let Some(temperature) = self.config.temperature {
            form = form.text("temperature", temperature.to_string());
        }

        log::debug!("STT: Uploading {} bytes for transcription", audio.len());

        let response = http::request_client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TranscriptionError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

        log::info!("STT: Transcript: '{}'", body.text);
        Ok(body.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SttConfig::default();
        assert_eq!(config.model, "whisper-large-v3-turbo");
        assert_eq!(config.language, None);
        assert_eq!(config.temperature, Some(0.0));
    }

    #[test]
    fn test_stt_creation() {
        let stt = GroqStt::new("gsk_test".to_string());
        assert_eq!(stt.api_key, "gsk_test");
        assert!(stt.base_url.contains("api.groq.com"));
    }

    #[test]
    fn test_transcription_response_parsing() {
        let body: TranscriptionResponse =
            serde_json::from_str(r#"{"text":"turn on the lights","x_groq":{"id":"req_1"}}"#)
                .unwrap();
        assert_eq!(body.text, "turn on the lights");
    }
}
