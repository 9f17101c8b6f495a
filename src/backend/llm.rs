use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_status, BackendError};
use crate::config::LlmConfig;

/// Input for one cleanup/annotation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub context: String,
    pub pregunta: String,
    pub respuesta: String,
}

/// Structured result. Fields the model leaves out are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmOutput {
    #[serde(default)]
    pub pregunta_limpia: Option<String>,
    #[serde(default)]
    pub respuesta_limpia: Option<String>,
    #[serde(default)]
    pub entonacion_p: Option<String>,
    #[serde(default)]
    pub entonacion_r: Option<String>,
}

impl LlmOutput {
    /// Parse the model's JSON text. Anything that is not a JSON object is
    /// malformed; missing keys are fine.
    pub fn parse(text: &str) -> Result<Self, BackendError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())
            .map_err(|e| BackendError::MalformedResponse(format!("not JSON: {}", e)))?;
        if !value.is_object() {
            return Err(BackendError::MalformedResponse(format!(
                "expected a JSON object, got {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmOutput, BackendError>;
}

/// Renders the user message sent alongside the system prompt.
pub fn render_user_message(request: &LlmRequest) -> String {
    format!(
        "Devuelve un objeto JSON con las claves:\n\
         {{\"pregunta_limpia\": string, \"respuesta_limpia\": string, \
         \"entonacion_p\": string, \"entonacion_r\": string}}\n\
         \n\
         CONTEXTO (puede estar vacío):\n{}\n\
         \n\
         TEXTO ORIGINAL:\n\
         PREGUNTA: {}\n\
         RESPUESTA: {}\n",
        request.context, request.pregunta, request.respuesta
    )
}

/// OpenAI-compatible chat completions client in JSON mode.
#[derive(Debug)]
pub struct OpenAiLlmClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmBackend for OpenAiLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmOutput, BackendError> {
        let user = render_user_message(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let chat: ChatResponse = response.json().await?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::MalformedResponse("response has no message content".to_string()))?;

        LlmOutput::parse(&content)
    }
}
