use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{check_status, BackendError};
use crate::config::TtsConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    /// Delivery guidance (tone, pacing). Sent only when present.
    pub instructions: Option<String>,
}

#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize `request` as MP3 into `out_path`, creating parent directories.
    async fn synthesize(&self, request: &SpeechRequest, out_path: &Path) -> Result<PathBuf, BackendError>;
}

/// OpenAI-compatible `/audio/speech` client.
#[derive(Debug)]
pub struct OpenAiTtsClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

impl OpenAiTtsClient {
    pub fn new(config: &TtsConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }

    fn url(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }
}

/// Sibling path the audio is streamed into before being renamed into place.
fn partial_path(out_path: &Path) -> PathBuf {
    let mut name = out_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    out_path.with_file_name(name)
}

#[async_trait]
impl TtsBackend for OpenAiTtsClient {
    async fn synthesize(&self, request: &SpeechRequest, out_path: &Path) -> Result<PathBuf, BackendError> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = SpeechBody {
            model: &self.model,
            voice: &request.voice,
            input: &request.text,
            response_format: "mp3",
            instructions: request.instructions.as_deref(),
        };

        tracing::debug!(
            voice = %request.voice,
            chars = request.text.chars().count(),
            has_instructions = request.instructions.is_some(),
            out = %out_path.display(),
            "Requesting speech synthesis"
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let mut response = check_status(response).await?;

        // Stream into a sibling file so a failed download never leaves a
        // truncated mp3 at the final path.
        let tmp = partial_path(out_path);
        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), BackendError>(())
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        tokio::fs::rename(&tmp, out_path).await?;
        Ok(out_path.to_path_buf())
    }
}
