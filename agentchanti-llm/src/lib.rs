//! # AgentChanti LLM client
//!
//! Talks to a locally hosted model server and hands back completion text.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based LLM communication (Ollama, LM Studio)
//! - **ProviderConfig**: Which server, which model, how long to wait
//! - **Usage**: Token accounting per call and per run
//!
//! The client performs exactly one HTTP request per call. Retry policy lives
//! in the orchestrator.

pub mod error;
pub mod provider;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    estimate_tokens, CompletionRequest, CompletionResponse, LlmProvider, LmStudioProvider,
    LocalProvider, OllamaProvider, ProviderConfig, ProviderKind, Usage, UsageTracker,
    DEFAULT_LM_STUDIO_URL, DEFAULT_MODEL, DEFAULT_OLLAMA_URL,
};
