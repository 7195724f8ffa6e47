//! Process-wide HTTP client handles shared by the provider adapters.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Client for bounded request/response calls (transcription, dialogue).
/// The 30 second timeout is the fail-closed bound for the dialogue backend.
static REQUEST_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create HTTP client")
});

/// Client for streaming responses. No overall timeout: synthesis streams for
/// as long as the utterance lasts. Connect attempts are still bounded.
static STREAMING_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client")
});

pub fn request_client() -> &'static Client {
    &REQUEST_CLIENT
}

pub fn streaming_client() -> &'static Client {
    &STREAMING_CLIENT
}
