use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] crate::server::ServerError),

    #[error("Client error: {0}")]
    Client(#[from] crate::client::ClientError),

    #[error("Audio error: {0}")]
    Audio(#[from] crate::playback::AudioError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
