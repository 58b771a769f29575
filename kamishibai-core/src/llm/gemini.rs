use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, CompletionOptions, CompletionTransport, Role, TransportError};

pub fn generate_content_url(endpoint: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        endpoint.trim_end_matches('/'),
        model
    )
}

/// `generateContent` client for the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl GeminiTransport {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    fn request_body(messages: &[ChatMessage], options: &CompletionOptions) -> GenerateRequest {
        let system: Vec<Part> = messages
            .iter()
            .filter(|message| message.role == Role::System)
            .map(|message| Part {
                text: message.content.clone(),
            })
            .collect();
        let contents = messages
            .iter()
            .filter(|message| message.role != Role::System)
            .map(|message| Content {
                role: match message.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                },
                parts: vec![Part {
                    text: message.content.clone(),
                }],
            })
            .collect();
        GenerateRequest {
            contents,
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(SystemInstruction { parts: system })
            },
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
                response_mime_type: options
                    .json_mode
                    .then(|| "application/json".to_string()),
            },
        }
    }
}

#[async_trait]
impl CompletionTransport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(
        &self,
        api_key: &str,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, TransportError> {
        let body = Self::request_body(messages, options);
        let response = self
            .client
            .post(generate_content_url(&self.endpoint, &self.model))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        let payload: GenerateResponse = response.json().await?;
        let text = payload
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(TransportError::EmptyResponse);
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}
