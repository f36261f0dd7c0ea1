//! Agent runner - one LLM call per role invocation
//!
//! Every role (planner, coder, reviewer, test writer) is a [`Role`]: a system
//! prompt, a way to render its input into a user prompt, and a parser for
//! the model's answer. The [`Agent`] owns the provider and does the rest:
//! the call itself, logging, token accounting and error context.

use agentchanti_llm::{CompletionRequest, ErrorKind, LlmProvider, Result, UsageTracker};
use tracing::{debug, warn};

/// Prompt/parse strategy for one pipeline role
pub trait Role {
    type Input;
    type Output;

    /// Short role name used in logs and error context
    fn name(&self) -> &'static str;

    fn system_prompt(&self) -> &str;

    /// Render the user prompt for `input`
    fn render(&self, input: &Self::Input) -> String;

    /// Parse the model's answer to the prompt rendered from `input`
    fn parse(&self, input: &Self::Input, response: &str) -> Result<Self::Output>;

    /// A stricter prompt to try once when [`Role::parse`] reports
    /// `MalformedOutput`. Roles without a re-prompt allowance return `None`.
    fn reprompt(&self, _input: &Self::Input) -> Option<String> {
        None
    }
}

/// Runs roles against a provider
pub struct Agent<P> {
    provider: P,
    usage: UsageTracker,
}

impl<P: LlmProvider> Agent<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            usage: UsageTracker::new(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Token usage accumulated over every call so far
    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Hand over the accumulated usage and start counting from zero
    pub fn take_usage(&mut self) -> UsageTracker {
        std::mem::take(&mut self.usage)
    }

    /// Invoke `role` on `input`.
    ///
    /// Client errors are returned as-is. A `MalformedOutput` from the parser
    /// gets exactly one retry with the role's stricter prompt, if it has one.
    pub async fn run<R: Role>(&mut self, role: &R, input: &R::Input) -> Result<R::Output> {
        let prompt = role.render(input);
        let response = self.call(role, prompt).await?;

        match role.parse(input, &response) {
            Ok(output) => Ok(output),
            Err(err) if err.kind() == ErrorKind::MalformedOutput => {
                let Some(strict) = role.reprompt(input) else {
                    return Err(err);
                };
                warn!(role = role.name(), error = %err, "unusable answer, re-prompting once");
                let response = self.call(role, strict).await?;
                role.parse(input, &response)
                    .map_err(|e| e.with_context("attempts", "2"))
            }
            Err(err) => Err(err),
        }
    }

    async fn call<R: Role>(&mut self, role: &R, prompt: String) -> Result<String> {
        let request = CompletionRequest::new(prompt).with_system(role.system_prompt());

        debug!(
            role = role.name(),
            provider = self.provider.name(),
            model = self.provider.model(),
            prompt = %request.prompt,
            "calling model"
        );

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| e.with_context("role", role.name()))?;

        self.usage.track(&response.model, &response.usage);

        debug!(
            role = role.name(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            response = %response.content,
            "model answered"
        );

        Ok(response.content)
    }
}
