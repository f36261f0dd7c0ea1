//! Orchestrator configuration

use agentchanti_llm::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one pipeline run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of Coder re-invocations after the first attempt
    pub max_retries: usize,
    /// Directory the artifact is written into before testing
    pub workspace_dir: PathBuf,
    /// Shell command run inside the workspace to test the artifact
    pub test_command: String,
    pub test_timeout: Duration,
    /// Ask the model for tests when the artifact ships none
    pub generate_tests: bool,
    pub skip_review: bool,
    /// Target language named in prompts
    pub language: String,
    /// Filename used when the coder answers with a bare code block
    pub default_filename: String,
    /// Upper bound on review/test feedback embedded in a coder prompt
    pub max_feedback_chars: usize,
    /// Revise previous code through chunk edits instead of whole files
    pub chunk_edits: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            workspace_dir: PathBuf::from("agentchanti_output"),
            test_command: "pytest".to_string(),
            test_timeout: Duration::from_secs(120),
            generate_tests: true,
            skip_review: false,
            language: "python".to_string(),
            default_filename: "main.py".to_string(),
            max_feedback_chars: 4000,
            chunk_edits: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = command.into();
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn with_generate_tests(mut self, enabled: bool) -> Self {
        self.generate_tests = enabled;
        self
    }

    pub fn with_skip_review(mut self, skip: bool) -> Self {
        self.skip_review = skip;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_default_filename(mut self, filename: impl Into<String>) -> Self {
        self.default_filename = filename.into();
        self
    }

    pub fn with_chunk_edits(mut self, enabled: bool) -> Self {
        self.chunk_edits = enabled;
        self
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.test_command.trim().is_empty() {
            return Err(Error::config_invalid("test_command", "must not be empty"));
        }
        if self.test_timeout.is_zero() {
            return Err(Error::config_invalid("test_timeout", "must be greater than zero"));
        }
        if self.default_filename.trim().is_empty() {
            return Err(Error::config_invalid("default_filename", "must not be empty"));
        }
        if self.max_feedback_chars == 0 {
            return Err(Error::config_invalid("max_feedback_chars", "must be greater than zero"));
        }
        Ok(())
    }
}
