//! LLM provider abstraction shared by the scorer and digest composer: a
//! `{model, system_prompt, user_prompt, max_output_tokens, reasoning_effort?}`
//! request, a `{output_text, usage}` response.

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: u32,
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub output_text: String,
    pub usage_tokens: Option<u32>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

pub struct RemoteLlmProvider {
    http: std::sync::Arc<reqwest::Client>,
    endpoint: String,
    api_key: String,
}

impl RemoteLlmProvider {
    pub fn new(http: std::sync::Arc<reqwest::Client>, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let body = serde_json::json!({
            "model": request.model,
            "system_prompt": request.system_prompt,
            "user_prompt": request.user_prompt,
            "max_output_tokens": request.max_output_tokens,
            "reasoning_effort": request.reasoning_effort,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: self.endpoint.clone(),
                detail: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(PipelineError::RateLimit {
                provider: "llm".to_string(),
                retry_after_secs,
            });
        }
        if !response.status().is_success() {
            return Err(PipelineError::TransientNetwork {
                target: self.endpoint.clone(),
                detail: format!("status {}", response.status()),
            });
        }

        let parsed: serde_json::Value = response.json().await?;
        Ok(LlmResponse {
            output_text: parsed["output_text"].as_str().unwrap_or_default().to_string(),
            usage_tokens: parsed["usage"]["total_tokens"].as_u64().map(|v| v as u32),
        })
    }
}
