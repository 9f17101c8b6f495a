pub mod llm;
pub mod tts;

use thiserror::Error;

pub use llm::{LlmBackend, LlmOutput, LlmRequest, OpenAiLlmClient};
pub use tts::{OpenAiTtsClient, SpeechRequest, TtsBackend};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("io error writing audio: {0}")]
    Io(#[from] std::io::Error),
}

/// Turn a non-success response into `BackendError::Status` with its body.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(BackendError::Status {
        status: response.status().as_u16(),
        message: response.text().await.unwrap_or_default(),
    })
}
