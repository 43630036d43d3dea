use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GeminiConfig;
use crate::error::{AppError, Result};

/// Raw media sent alongside a prompt.
#[derive(Debug, Clone)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One schema-constrained generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub media: Option<InlineMedia>,
    /// Response schema in the vendor's OpenAPI subset.
    pub schema: Value,
}

/// The generative model, reduced to "prompt (+ media) and schema in, JSON out".
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(Blob),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Gemini `generateContent` over REST with JSON-mode structured output.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiClient {
    /// Returns `None` when no API key is configured.
    pub fn from_config(config: &GeminiConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            client: Client::new(),
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl Extractor for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        let mut parts = vec![Part::Text(request.prompt.clone())];
        if let Some(media) = &request.media {
            parts.push(Part::InlineData(Blob {
                mime_type: media.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&media.data),
            }));
        }

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user".into(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: "application/json".into(),
                response_schema: request.schema.clone(),
            },
        };

        let res = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LlmError(format!("Request to Gemini failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(AppError::LlmError(format!("Gemini returned {}: {}", status, detail)));
        }

        let parsed: GenerateContentResponse = res
            .json()
            .await
            .map_err(|e| AppError::LlmError(format!("Invalid response format from Gemini: {}", e)))?;

        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| AppError::LlmError("Gemini response has no text part".to_string()))?;

        let value = serde_json::from_str(&text)?;
        Ok(value)
    }
}
