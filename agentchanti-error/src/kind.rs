//! [`ErrorKind`]: the failure categories the pipeline tells apart

use std::fmt;

/// Category of an [`Error`](crate::Error).
///
/// The orchestrator matches on the kind to choose between a planner
/// re-prompt, a fatal abort and the normal retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Catch-all for failures no other kind covers
    Unexpected,
    /// A setting or environment variable has an unusable value
    ConfigInvalid,
    InvalidArgument,

    /// The model server did not accept the connection
    ConnectionFailed,
    /// No answer arrived within the configured duration
    Timeout,
    /// Non-success status or an unreadable body from the model server
    ProviderFailed,

    /// A role could not extract its output from the model's answer
    MalformedOutput,

    /// The test command could not be spawned
    TestRunnerFailed,

    /// Review or tests were still failing when the retry budget ran out
    RetryExhausted,
    /// A stage failed with something other than a verdict
    FatalAbort,
    /// Interrupted by the user
    Cancelled,

    FileNotFound,
    PermissionDenied,
    IoFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;

        match self {
            Unexpected => "Unexpected",
            ConfigInvalid => "ConfigInvalid",
            InvalidArgument => "InvalidArgument",
            ConnectionFailed => "ConnectionFailed",
            Timeout => "Timeout",
            ProviderFailed => "ProviderFailed",
            MalformedOutput => "MalformedOutput",
            TestRunnerFailed => "TestRunnerFailed",
            RetryExhausted => "RetryExhausted",
            FatalAbort => "FatalAbort",
            Cancelled => "Cancelled",
            FileNotFound => "FileNotFound",
            PermissionDenied => "PermissionDenied",
            IoFailed => "IoFailed",
        }
    }

    /// Transport failures start out temporary, everything else permanent.
    ///
    /// The LLM client never retries by itself; the status only informs the
    /// caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
