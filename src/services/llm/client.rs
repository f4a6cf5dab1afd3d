//! Generation capability and its HTTP implementation
//!
//! `LlmClient` is the seam the orchestrator and retry engine call through;
//! `OpenAiCompatClient` implements it against any chat-completions-style
//! API. Replies come back as plain text (the prompt builders instruct the
//! model to emit a bare SPARQL query), with token usage and finish reason
//! attached. 429 responses surface the server's Retry-After so the retry
//! engine can pace itself.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::models::{GenerateRequest, GenerateResponse, LlmError, LlmProvider};

/// The generation capability consumed by the pipeline
///
/// The orchestrator and retry engine only ever see this trait; the concrete
/// HTTP client below is one implementation, test mocks are another.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError>;
}

/// HTTP client for OpenAI-compatible chat-completions APIs
pub struct OpenAiCompatClient {
    http_client: Client,
    provider: LlmProvider,
}

impl OpenAiCompatClient {
    pub fn new(provider: LlmProvider) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, provider }
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    /// Test connection to the provider (simple models list request)
    pub async fn test_connection(&self) -> Result<(), LlmError> {
        let api_key = self
            .provider
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::ApiError("API key not configured".to_string()))?;

        let url = format!("{}/models", self.provider.api_base.trim_end_matches('/'));

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(10)
                } else if e.is_connect() {
                    LlmError::ApiError(format!("Connection failed: {}", e))
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::ApiError("Invalid API key".to_string()));
        }

        if !status.is_success() {
            return Err(LlmError::ApiError(format!("API error {}", status)));
        }

        Ok(())
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let api_key = self
            .provider
            .api_key
            .as_ref()
            .ok_or_else(|| LlmError::ApiError("API key not configured".to_string()))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage { role: "system".to_string(), content: system.clone() });
        }
        messages.push(ChatMessage { role: "user".to_string(), content: request.prompt.clone() });

        let chat_request = ChatCompletionRequest {
            model: self.provider.model_name.clone(),
            messages,
            max_tokens: Some(request.max_tokens.unwrap_or(self.provider.max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.provider.temperature)),
        };

        let url = format!("{}/chat/completions", self.provider.api_base.trim_end_matches('/'));

        tracing::debug!(
            "Calling LLM API: {} with model {}",
            url,
            self.provider.model_name
        );

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(self.provider.timeout_seconds))
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.provider.timeout_seconds)
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))?;

        let content = choice
            .message
            .content
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))?;

        let prompt_tokens = chat_response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0);
        let completion_tokens = chat_response
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0);

        Ok(GenerateResponse {
            content,
            prompt_tokens,
            completion_tokens,
            finish_reason: choice.finish_reason,
        })
    }
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
