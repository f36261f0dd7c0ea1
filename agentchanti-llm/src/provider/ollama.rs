//! Ollama provider - native `/api/generate` endpoint
//!
//! Default endpoint: http://localhost:11434/api/generate

use super::*;
use crate::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ollama provider
pub struct OllamaProvider {
    client: Client,
    config: ProviderConfig,
    api_root: String,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = config.http_client()?;
        let api_root = api_root(&config.base_url);
        Ok(Self {
            client,
            config,
            api_root,
        })
    }

    /// Create with default local settings
    pub fn local() -> Result<Self> {
        Self::new(ProviderConfig::ollama())
    }

    /// Server root, without any `/api/...` suffix
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.api_root)
    }
}

/// Derive the API root from a configured URL.
///
/// `OLLAMA_BASE_URL` is commonly set to the full generate endpoint
/// (`http://localhost:11434/api/generate`); everything from the last `/api/`
/// on is dropped.
pub fn api_root(base_url: &str) -> String {
    match base_url.rfind("/api/") {
        Some(idx) => base_url[..idx].to_string(),
        None => base_url.trim_end_matches('/').to_string(),
    }
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = self.generate_url();
        let temperature = request.temperature.or(self.config.temperature);

        let api_request = GenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            options: temperature.map(|temperature| GenerateOptions { temperature }),
        };

        debug!(
            model = %self.config.model,
            est_tokens = estimate_tokens(&request.prompt),
            "sending prompt to ollama"
        );

        let response = self
            .client
            .post(&url)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| error::send_failed("ollama", &url, self.config.timeout, e))
            .map_err(|e| e.with_operation("ollama::complete"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error::status_failed(&url, status.as_u16(), &text)
                .with_operation("ollama::complete")
                .with_context("model", self.config.model.clone()));
        }

        let api_response: GenerateResponse = response
            .json()
            .await
            .map_err(|e| error::body_failed("ollama", &url, self.config.timeout, e))
            .map_err(|e| e.with_operation("ollama::complete"))?;

        let content = api_response.response.ok_or_else(|| {
            Error::provider_failed("response body has no 'response' field")
                .with_operation("ollama::complete")
                .with_context("url", url.clone())
        })?;

        let usage = match (api_response.prompt_eval_count, api_response.eval_count) {
            (Some(prompt), Some(completion)) => Usage::new(prompt, completion),
            (Some(prompt), None) => Usage::new(prompt, 0),
            (None, completion) => Usage::new(
                estimate_tokens(&request.prompt),
                completion.unwrap_or_default(),
            ),
        };

        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            chars = content.len(),
            "ollama responded"
        );

        Ok(CompletionResponse {
            model: api_response.model.unwrap_or_else(|| self.config.model.clone()),
            content,
            usage,
        })
    }
}

// ============================================================================
// Ollama API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    model: Option<String>,
    response: Option<String>,
    prompt_eval_count: Option<usize>,
    eval_count: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use httpmock::prelude::*;
    use serde_json::json;

    fn provider_for(server: &MockServer) -> OllamaProvider {
        OllamaProvider::new(
            ProviderConfig::ollama()
                .with_base_url(server.base_url())
                .with_model("llama3"),
        )
        .unwrap()
    }

    #[test]
    fn test_api_root() {
        assert_eq!(api_root("http://localhost:11434"), "http://localhost:11434");
        assert_eq!(api_root("http://localhost:11434/"), "http://localhost:11434");
        assert_eq!(
            api_root("http://localhost:11434/api/generate"),
            "http://localhost:11434"
        );
        assert_eq!(api_root("http://gpu-box/ollama/api/chat"), "http://gpu-box/ollama");
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "llama3", "prompt": "say hi", "stream": false}"#);
                then.status(200).json_body(json!({
                    "model": "llama3",
                    "response": "hi",
                    "done": true,
                    "prompt_eval_count": 12,
                    "eval_count": 3
                }));
            })
            .await;

        let provider = provider_for(&server);
        let response = provider.complete(CompletionRequest::new("say hi")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "hi");
        assert_eq!(response.usage, Usage::new(12, 3));
    }

    #[tokio::test]
    async fn test_complete_estimates_missing_usage() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({ "response": "ok" }));
            })
            .await;

        let provider = provider_for(&server);
        let response = provider
            .complete(CompletionRequest::new("add two numbers"))
            .await
            .unwrap();

        assert_eq!(response.model, "llama3");
        assert_eq!(response.usage.prompt_tokens, 4);
        assert_eq!(response.usage.completion_tokens, 0);
    }

    #[tokio::test]
    async fn test_sends_system_prompt() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"system": "You are a code reviewer."}"#);
                then.status(200).json_body(json!({ "response": "Code looks good." }));
            })
            .await;

        let provider = provider_for(&server);
        let request = CompletionRequest::new("review this").with_system("You are a code reviewer.");
        provider.complete(request).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(404).body(r#"{"error":"model 'llama3' not found"}"#);
            })
            .await;

        let err = provider_for(&server)
            .complete(CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProviderFailed);
        assert_eq!(err.context_value("status"), Some("404"));
        assert!(err.message().contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_response_field_is_provider_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({ "done": true }));
            })
            .await;

        let err = provider_for(&server)
            .complete(CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProviderFailed);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let provider = OllamaProvider::new(
            ProviderConfig::ollama().with_base_url(format!("http://127.0.0.1:{}", port)),
        )
        .unwrap();

        let err = provider.complete(CompletionRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert_eq!(err.operation(), "ollama::complete");
    }

    #[tokio::test]
    async fn test_slow_server_is_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .json_body(json!({ "response": "late" }));
            })
            .await;

        let provider = OllamaProvider::new(
            ProviderConfig::ollama()
                .with_base_url(server.base_url())
                .with_timeout(Duration::from_millis(200)),
        )
        .unwrap();

        let err = provider.complete(CompletionRequest::new("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
