use crate::http;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DialogueError {
    #[error("Dialogue backend timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for DialogueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DialogueError::Timeout
        } else {
            DialogueError::Request(err)
        }
    }
}

/// Conversational backend capability consumed by the session pipeline.
#[async_trait::async_trait]
pub trait Converse: Send + Sync {
    /// Exchange one dialogue turn for the given session.
    async fn converse(&self, text: &str, session_id: &str) -> Result<String, DialogueError>;
}

/// Dialogue adapter posting to an n8n-style webhook.
///
/// The backend replies with `{"response": {"output": "<text>"}}`. Any other
/// shape is a malformed response, never a guessed default.
pub struct WebhookDialogue {
    webhook_url: String,
}

impl WebhookDialogue {
    pub fn new(webhook_url: String) -> Self {
        Self { webhook_url }
    }

    fn extract_reply(body: &Value) -> Result<String, DialogueError> {
        body.get("response")
            .and_then(|r| r.get("output"))
            .and_then(|o| o.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                DialogueError::MalformedResponse(
                    "expected 'response.output' field in webhook reply".to_string(),
                )
            })
    }
}

#[async_trait::async_trait]
impl Converse for WebhookDialogue {
    async fn converse(&self, text: &str, session_id: &str) -> Result<String, DialogueError> {
        let payload = json!({
            "chatInput": text,
            "sessionId": session_id,
        });

        log::debug!("Dialogue: Sending turn for session '{}'", session_id);

        let response = http::request_client()
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DialogueError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DialogueError::MalformedResponse(e.to_string()))?;

        let reply = Self::extract_reply(&body)?;
        log::info!("Dialogue: Reply: '{}'", reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_reply() {
        let body = json!({"response": {"output": "Lights are on."}});
        assert_eq!(
            WebhookDialogue::extract_reply(&body).unwrap(),
            "Lights are on."
        );
    }

    #[test]
    fn test_missing_nested_field_is_malformed() {
        for body in [
            json!({}),
            json!({"response": {}}),
            json!({"response": {"output": 42}}),
            json!({"output": "Lights are on."}),
        ] {
            assert!(matches!(
                WebhookDialogue::extract_reply(&body),
                Err(DialogueError::MalformedResponse(_))
            ));
        }
    }
}
