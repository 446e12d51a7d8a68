//! Raw HTTP client for the AI endpoint
//!
//! Deployment-scoped chat-completion and embedding requests with structured
//! JSON output. This layer is transport only; rate limiting, circuit
//! breaking, caching and cost accounting live in the enrichment service
//! wrapping it.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::error::AiError;
use crate::core::config::AiConfig;

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Chat completion outcome with token usage.
#[derive(Debug)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Embedding outcome with token usage.
#[derive(Debug)]
pub struct EmbedOutcome {
    pub vectors: Vec<Vec<f32>>,
    pub tokens: u64,
}

pub struct AiHttpClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    chat_deployment: String,
    embedding_deployment: String,
}

impl AiHttpClient {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AiError::Persistent(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            chat_deployment: config.chat_deployment.clone(),
            embedding_deployment: config.embedding_deployment.clone(),
        })
    }

    /// Structured-output chat completion.
    pub async fn chat(&self, messages: &[serde_json::Value]) -> Result<ChatOutcome, AiError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.chat_deployment, self.api_version
        );
        let response = self
            .http
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&json!({
                "messages": messages,
                "response_format": { "type": "json_object" },
                "temperature": 0.0,
            }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("chat response: {}", e)))?;
        let usage = body.usage.unwrap_or_default();
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::InvalidResponse("chat response had no content".into()))?;

        Ok(ChatOutcome {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    /// Batch embedding request. Vectors come back in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<EmbedOutcome, AiError> {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.embedding_deployment, self.api_version
        );
        let response = self
            .http
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&json!({ "input": texts }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("embedding response: {}", e)))?;
        if body.data.len() != texts.len() {
            return Err(AiError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        let mut ordered = body.data;
        ordered.sort_by_key(|d| d.index);
        let tokens = body
            .usage
            .map(|u| if u.total_tokens > 0 { u.total_tokens } else { u.prompt_tokens })
            .unwrap_or(0);

        Ok(EmbedOutcome {
            vectors: ordered.into_iter().map(|d| d.embedding).collect(),
            tokens,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        429 => AiError::RateLimited,
        s if s >= 500 => AiError::Transient(format!("HTTP {}: {}", s, message)),
        401 | 403 => AiError::Persistent(format!("authentication rejected (HTTP {})", status)),
        s => AiError::Persistent(format!("HTTP {}: {}", s, message)),
    })
}
