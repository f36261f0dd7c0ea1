//! Environment-driven settings
//!
//! The CLI is the only place that reads the process environment. Everything
//! below it receives explicit configuration values.

use agentchanti_llm::{
    Error, ProviderKind, Result, DEFAULT_LM_STUDIO_URL, DEFAULT_MODEL, DEFAULT_OLLAMA_URL,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ollama_base_url: String,
    pub lm_studio_base_url: String,
    pub model: String,
    pub max_retries: Option<usize>,
    pub test_command: Option<String>,
    pub workspace: Option<PathBuf>,
    /// LLM request timeout
    pub timeout: Option<Duration>,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ollama_base_url =
            non_empty("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let lm_studio_base_url =
            non_empty("LM_STUDIO_BASE_URL").unwrap_or_else(|| DEFAULT_LM_STUDIO_URL.to_string());
        let model = non_empty("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let max_retries = non_empty("AGENTCHANTI_MAX_RETRIES")
            .map(|v| parse_number::<usize>("AGENTCHANTI_MAX_RETRIES", &v))
            .transpose()?;

        let timeout = non_empty("AGENTCHANTI_TIMEOUT_SECS")
            .map(|v| parse_seconds("AGENTCHANTI_TIMEOUT_SECS", &v))
            .transpose()?;

        Ok(Self {
            ollama_base_url,
            lm_studio_base_url,
            model,
            max_retries,
            test_command: non_empty("AGENTCHANTI_TEST_COMMAND"),
            workspace: non_empty("AGENTCHANTI_WORKSPACE").map(PathBuf::from),
            timeout,
        })
    }

    pub fn base_url(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Ollama => &self.ollama_base_url,
            ProviderKind::LmStudio => &self.lm_studio_base_url,
        }
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config_invalid(key, format!("'{}': {}", value, e)))
}

/// A positive number of seconds
pub fn parse_seconds(key: &'static str, value: &str) -> Result<Duration> {
    match parse_number::<u64>(key, value)? {
        0 => Err(Error::config_invalid(key, "must be greater than zero")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchanti_llm::ErrorKind;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.ollama_base_url, "http://localhost:11434");
        assert_eq!(settings.lm_studio_base_url, "http://localhost:1234/v1");
        assert_eq!(settings.model, "deepseek-coder-v2-lite-instruct");
        assert_eq!(settings.max_retries, None);
        assert_eq!(settings.timeout, None);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("OLLAMA_BASE_URL", "http://gpu:11434/api/generate"),
            ("DEFAULT_MODEL", "qwen2.5-coder"),
            ("AGENTCHANTI_MAX_RETRIES", "5"),
            ("AGENTCHANTI_TIMEOUT_SECS", " 60 "),
            ("AGENTCHANTI_TEST_COMMAND", "pytest -q"),
            ("AGENTCHANTI_WORKSPACE", "/tmp/out"),
            ("LM_STUDIO_BASE_URL", ""),
        ]))
        .unwrap();

        assert_eq!(settings.base_url(ProviderKind::Ollama), "http://gpu:11434/api/generate");
        assert_eq!(settings.base_url(ProviderKind::LmStudio), "http://localhost:1234/v1");
        assert_eq!(settings.model, "qwen2.5-coder");
        assert_eq!(settings.max_retries, Some(5));
        assert_eq!(settings.timeout, Some(Duration::from_secs(60)));
        assert_eq!(settings.test_command.as_deref(), Some("pytest -q"));
        assert_eq!(settings.workspace, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_invalid_number() {
        let err = Settings::from_lookup(lookup(&[("AGENTCHANTI_MAX_RETRIES", "three")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("key"), Some("AGENTCHANTI_MAX_RETRIES"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = Settings::from_lookup(lookup(&[("AGENTCHANTI_TIMEOUT_SECS", "0")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("key"), Some("AGENTCHANTI_TIMEOUT_SECS"));
    }
}
