use secrecy::{ExposeSecret, SecretBox};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },

    #[error("Invalid URL for {name}: {reason}")]
    InvalidUrl { name: String, reason: String },
}

/// Server configuration, loaded from the environment.
#[derive(Debug)]
pub struct RelayConfig {
    pub groq_key: SecretBox<String>,
    pub elevenlabs_key: SecretBox<String>,
    pub dialogue_webhook_url: String,
    pub bind_address: String,
    /// Fallback session id used when a turn request carries none.
    pub default_session_id: String,
}

impl RelayConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let groq_key = Self::load_api_key("GROQ_API_KEY", "Groq")?;
        let elevenlabs_key = Self::load_api_key("ELEVENLABS_API_KEY", "ElevenLabs")?;
        let dialogue_webhook_url = Self::load_webhook_url("DIALOGUE_WEBHOOK_URL")?;

        let bind_address =
            env::var("RELAY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        let default_session_id =
            env::var("RELAY_DEFAULT_SESSION_ID").unwrap_or_else(|_| "test-user-001".to_string());

        Ok(Self {
            groq_key,
            elevenlabs_key,
            dialogue_webhook_url,
            bind_address,
            default_session_id,
        })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(&key, service_name)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    fn load_webhook_url(env_var: &str) -> Result<String, ConfigError> {
        let raw = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        url::Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            name: env_var.to_string(),
            reason: e.to_string(),
        })?;

        Ok(raw)
    }

    /// Validate API key format for each service
    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        match service {
            "Groq" => {
                // Groq keys typically start with "gsk_"
                if !key.starts_with("gsk_") {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "Groq keys should start with 'gsk_'".to_string(),
                    });
                }
            }
            "ElevenLabs" => {
                // ElevenLabs keys are typically hex strings
                if key.len() < 10 {
                    return Err(ConfigError::InvalidKeyFormat {
                        service: service.to_string(),
                        reason: "ElevenLabs keys should be at least 10 characters".to_string(),
                    });
                }
            }
            _ => {} // No validation for unknown services
        }
        Ok(())
    }

    /// Get Groq API key (use only when making API calls)
    pub fn groq_key(&self) -> &str {
        self.groq_key.expose_secret()
    }

    /// Get ElevenLabs API key (use only when making API calls)
    pub fn elevenlabs_key(&self) -> &str {
        self.elevenlabs_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    match RelayConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded relay configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_value_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(RelayConfig::validate_key_format("gsk_test123", "Groq").is_ok());
        assert!(RelayConfig::validate_key_format("invalid", "Groq").is_err());

        assert!(RelayConfig::validate_key_format("1234567890abcdef", "ElevenLabs").is_ok());
        assert!(RelayConfig::validate_key_format("short", "ElevenLabs").is_err());
    }

    #[test]
    fn test_webhook_url_validation() {
        std::env::set_var("TEST_WEBHOOK_URL_OK", "https://n8n.local/webhook/voice");
        assert!(RelayConfig::load_webhook_url("TEST_WEBHOOK_URL_OK").is_ok());

        std::env::set_var("TEST_WEBHOOK_URL_BAD", "not a url");
        assert!(RelayConfig::load_webhook_url("TEST_WEBHOOK_URL_BAD").is_err());

        assert!(matches!(
            RelayConfig::load_webhook_url("TEST_WEBHOOK_URL_UNSET"),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }
}
