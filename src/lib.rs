pub mod client;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod playback;
pub mod protocol;
pub mod server;
pub mod stt;
pub mod tts;

pub use error::{RelayError, Result};
