//! Clients for locally hosted model servers.
//!
//! [`LlmProvider`] is the seam the agent crate is generic over. Two backends
//! implement it: Ollama through its native `/api/generate` endpoint and
//! LM Studio through the OpenAI-compatible `/v1/chat/completions`.
//! [`LocalProvider`] picks between them at runtime and [`UsageTracker`]
//! sums token counts over a run.
//!
//! Providers never retry. A failed call surfaces as `ConnectionFailed`,
//! `Timeout` or `ProviderFailed` and the caller decides what happens next.

pub mod lm_studio;
pub mod ollama;

pub use lm_studio::LmStudioProvider;
pub use ollama::OllamaProvider;

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Model used when neither the command line nor the environment names one
pub const DEFAULT_MODEL: &str = "deepseek-coder-v2-lite-instruct";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_LM_STUDIO_URL: &str = "http://localhost:1234/v1";

/// One prompt, optionally with a system message
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// The model's answer and what it cost
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub usage: Usage,
}

/// Token counts for a single call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Usage for a call whose server reported no token counts
    pub fn estimated(prompt: &str) -> Self {
        Self::new(estimate_tokens(prompt), 0)
    }
}

/// Rough token estimate: about 1.3 tokens per whitespace-separated word.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words * 13).div_ceil(10)
}

/// A model server that turns a prompt into text
#[allow(async_fn_in_trait)]
pub trait LlmProvider {
    /// `ollama` or `lm_studio`
    fn name(&self) -> &str;

    /// The model requests are sent to
    fn model(&self) -> &str;

    /// One non-streaming call. Never retried here.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Bare prompt in, text out
    async fn prompt(&self, prompt: &str) -> Result<String> {
        let response = self.complete(CompletionRequest::new(prompt)).await?;
        Ok(response.content)
    }
}

/// Which local server to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Ollama,
    LmStudio,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::LmStudio => "lm_studio",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => DEFAULT_OLLAMA_URL,
            ProviderKind::LmStudio => DEFAULT_LM_STUDIO_URL,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "lm_studio" | "lm-studio" | "lmstudio" => Ok(ProviderKind::LmStudio),
            other => Err(Error::config_invalid(
                "provider",
                format!("unknown provider '{}', expected ollama or lm_studio", other),
            )),
        }
    }
}

/// Where to connect and which model to ask
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: kind.default_base_url().to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(300),
            temperature: Some(0.7),
        }
    }

    pub fn ollama() -> Self {
        Self::new(ProviderKind::Ollama)
    }

    pub fn lm_studio() -> Self {
        Self::new(ProviderKind::LmStudio)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Reject settings no request could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::config_invalid("base_url", "must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config_invalid("model", "must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config_invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        self.validate()?;
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                Error::config_invalid("http_client", format!("failed to build HTTP client: {}", e))
                    .set_source(e)
            })
    }
}

/// The backend the user picked on the command line
pub enum LocalProvider {
    Ollama(OllamaProvider),
    LmStudio(LmStudioProvider),
}

impl LocalProvider {
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        match config.kind {
            ProviderKind::Ollama => Ok(LocalProvider::Ollama(OllamaProvider::new(config)?)),
            ProviderKind::LmStudio => Ok(LocalProvider::LmStudio(LmStudioProvider::new(config)?)),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            LocalProvider::Ollama(_) => ProviderKind::Ollama,
            LocalProvider::LmStudio(_) => ProviderKind::LmStudio,
        }
    }
}

impl LlmProvider for LocalProvider {
    fn name(&self) -> &str {
        match self {
            LocalProvider::Ollama(p) => p.name(),
            LocalProvider::LmStudio(p) => p.name(),
        }
    }

    fn model(&self) -> &str {
        match self {
            LocalProvider::Ollama(p) => p.model(),
            LocalProvider::LmStudio(p) => p.model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        match self {
            LocalProvider::Ollama(p) => p.complete(request).await,
            LocalProvider::LmStudio(p) => p.complete(request).await,
        }
    }
}

/// Running token totals, overall and per model
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTracker {
    pub total_calls: usize,
    pub total_prompt_tokens: usize,
    pub total_completion_tokens: usize,
    pub by_model: HashMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call against `model`
    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.total_calls += 1;
        self.total_prompt_tokens += usage.prompt_tokens;
        self.total_completion_tokens += usage.completion_tokens;

        let per_model = self.by_model.entry(model.to_owned()).or_default();
        *per_model = Usage::new(
            per_model.prompt_tokens + usage.prompt_tokens,
            per_model.completion_tokens + usage.completion_tokens,
        );
    }

    pub fn total_tokens(&self) -> usize {
        self.total_prompt_tokens + self.total_completion_tokens
    }
}
