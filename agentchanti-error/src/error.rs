//! [`Error`]: what went wrong, where, and whether trying again can help

use crate::{ErrorKind, ErrorStatus};
use std::fmt;
use std::time::Duration;

/// Error shared by every AgentChanti crate.
///
/// Besides its [`ErrorKind`] and message, an error records the operation
/// that raised it, an ordered list of `key: value` annotations picked up
/// while it travelled up the stack, and optionally the lower-level error
/// it wraps. The orchestrator reads annotations such as `role`, `stage` and
/// `gate` to build its failure summary.
///
/// ```rust
/// use agentchanti_error::{Error, ErrorKind, ErrorStatus};
///
/// let err = Error::new(ErrorKind::ConnectionFailed, "connection refused")
///     .with_operation("ollama::complete")
///     .with_context("url", "http://localhost:11434/api/generate");
///
/// assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
/// assert_eq!(err.status(), ErrorStatus::Temporary);
/// assert_eq!(err.context_value("url"), Some("http://localhost:11434/api/generate"));
/// ```
pub struct Error {
    kind: ErrorKind,
    status: ErrorStatus,
    message: String,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// New error whose status follows [`ErrorKind::is_retryable`]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: match kind.is_retryable() {
                true => ErrorStatus::Temporary,
                false => ErrorStatus::Permanent,
            },
            message: message.into(),
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Innermost-last operation name; empty when none was recorded
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Annotations in the order they were attached
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// First annotation stored under `key`
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find_map(|(k, v)| (*k == key).then_some(v.as_str()))
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    /// Kind of the wrapped AgentChanti error, if the source is one.
    ///
    /// A `FatalAbort` keeps the failing stage's error as its source, so this
    /// separates an unreachable server from an unusable answer.
    pub fn cause_kind(&self) -> Option<ErrorKind> {
        let inner = self.source.as_ref()?.downcast_ref::<Error>()?;
        Some(inner.kind)
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    pub fn with_status(self, status: ErrorStatus) -> Self {
        Self { status, ..self }
    }

    pub fn temporary(self) -> Self {
        self.with_status(ErrorStatus::Temporary)
    }

    pub fn permanent(self) -> Self {
        self.with_status(ErrorStatus::Permanent)
    }

    /// Temporary becomes persistent; other statuses are kept
    pub fn persist(self) -> Self {
        let status = self.status.persist();
        self.with_status(status)
    }

    /// Record the operation that is returning this error.
    ///
    /// An operation recorded earlier is pushed into the context under
    /// `called`, so nested calls leave a trail.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        let previous = std::mem::replace(&mut self.operation, operation);
        if !previous.is_empty() {
            self.context.push(("called", previous.to_owned()));
        }
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Attach the underlying error. Only one source may be set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "error source set twice");
        self.source = Some(source.into());
        self
    }
}

/// Single line: `Kind (status) at op, context { k: v } => message`
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)?;
        if !self.operation.is_empty() {
            write!(f, " at {}", self.operation)?;
        }
        if let Some(((k, v), rest)) = self.context.split_first() {
            write!(f, ", context {{ {}: {}", k, v)?;
            for (k, v) in rest {
                write!(f, ", {}: {}", k, v)?;
            }
            f.write_str(" }")?;
        }
        match self.message.is_empty() {
            true => Ok(()),
            false => write!(f, " => {}", self.message),
        }
    }
}

/// Multi-line dump used by `{:?}` in debug logs
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = if self.operation.is_empty() { "-" } else { self.operation };
        writeln!(f, "{} ({}) at {}", self.kind, self.status, operation)?;
        if !self.message.is_empty() {
            writeln!(f, "  message: {}", self.message)?;
        }
        for (k, v) in &self.context {
            writeln!(f, "  {} = {}", k, v)?;
        }
        if let Some(source) = &self.source {
            writeln!(f, "  caused by: {:?}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| -> &(dyn std::error::Error + 'static) { e.as_ref() })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let kind = match err.kind() {
            Io::NotFound => ErrorKind::FileNotFound,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Self::new(kind, err.to_string())
            .with_operation("io")
            .set_source(err)
    }
}

// Constructors for the failures the pipeline distinguishes.
impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// `key` names the offending setting or environment variable
    pub fn config_invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, reason).with_context("key", key)
    }

    /// The model server at `url` could not be reached
    pub fn connection_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, reason).with_context("url", url)
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        let message = format!("{} did not respond within {:?}", what.into(), after);
        Self::new(ErrorKind::Timeout, message).with_context("timeout", format!("{:?}", after))
    }

    /// The server answered, but not with something usable
    pub fn provider_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderFailed, message)
    }

    pub fn malformed_output(role: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedOutput, message).with_context("role", role)
    }

    /// The test command could not be started at all
    pub fn test_runner_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::TestRunnerFailed, reason).with_context("command", command)
    }

    /// `gate` is the check that kept failing: `review` or `tests`
    pub fn retry_exhausted(max_retries: usize, gate: &'static str) -> Self {
        let message = format!("{} still failing after {} retries", gate, max_retries);
        Self::new(ErrorKind::RetryExhausted, message)
            .with_context("max_retries", max_retries.to_string())
            .with_context("gate", gate)
    }

    /// Abort the run at `stage`, keeping `cause` as the source
    pub fn fatal_abort(stage: &'static str, cause: Error) -> Self {
        Self::new(ErrorKind::FatalAbort, cause.to_string())
            .with_context("stage", stage)
            .set_source(cause)
    }

    pub fn cancelled(stage: &'static str) -> Self {
        Self::new(ErrorKind::Cancelled, "run interrupted").with_context("stage", stage)
    }
}
