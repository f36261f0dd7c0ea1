//! LM Studio provider - OpenAI-compatible chat completions
//!
//! Default endpoint: http://localhost:1234/v1/chat/completions

use super::*;
use crate::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful coding assistant.";

/// LM Studio provider
pub struct LmStudioProvider {
    client: Client,
    config: ProviderConfig,
}

impl LmStudioProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    /// Create with default local settings
    pub fn local() -> Result<Self> {
        Self::new(ProviderConfig::lm_studio())
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

impl LlmProvider for LmStudioProvider {
    fn name(&self) -> &str {
        "lm_studio"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = self.completions_url();
        let system = request.system.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let api_request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: system,
                },
                ChatMessage {
                    role: Role::User,
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature.or(self.config.temperature),
            stream: false,
        };

        debug!(
            model = %self.config.model,
            est_tokens = estimate_tokens(&request.prompt),
            "sending prompt to lm studio"
        );

        let response = self
            .client
            .post(&url)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| error::send_failed("lm_studio", &url, self.config.timeout, e))
            .map_err(|e| e.with_operation("lm_studio::complete"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error::status_failed(&url, status.as_u16(), &text)
                .with_operation("lm_studio::complete")
                .with_context("model", self.config.model.clone()));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| error::body_failed("lm_studio", &url, self.config.timeout, e))
            .map_err(|e| e.with_operation("lm_studio::complete"))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                Error::provider_failed("response has no choices[0].message.content")
                    .with_operation("lm_studio::complete")
                    .with_context("url", url.clone())
            })?;

        let usage = api_response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_else(|| Usage::estimated(&request.prompt));

        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            chars = content.len(),
            "lm studio responded"
        );

        Ok(CompletionResponse {
            model: api_response.model.unwrap_or_else(|| self.config.model.clone()),
            content,
            usage,
        })
    }
}

// ============================================================================
// OpenAI-compatible API Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}
