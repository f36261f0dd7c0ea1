//! LLM client error helpers
//!
//! Re-exports agentchanti-error and maps HTTP transport failures onto the
//! client's three failure kinds: connection, timeout, provider.

pub use agentchanti_error::{Error, ErrorKind, ErrorStatus, Result};

use std::time::Duration;

/// Map a failed `send()` into ConnectionFailed or Timeout.
///
/// Anything that is neither a timeout nor a connect error still never reached
/// the server's application layer, so it is reported as a connection failure.
pub(crate) fn send_failed(
    provider: &'static str,
    url: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> Error {
    if err.is_timeout() {
        Error::timeout(provider, timeout)
            .with_context("url", url)
            .set_source(err)
    } else {
        Error::connection_failed(url, err.to_string()).set_source(err)
    }
}

/// Map a failure while reading or decoding the response body.
pub(crate) fn body_failed(
    provider: &'static str,
    url: &str,
    timeout: Duration,
    err: reqwest::Error,
) -> Error {
    if err.is_timeout() {
        Error::timeout(provider, timeout)
            .with_context("url", url)
            .set_source(err)
    } else {
        Error::provider_failed(format!("malformed response body: {}", err))
            .with_context("url", url)
            .set_source(err)
    }
}

/// Build a ProviderFailed error for a non-success HTTP status.
pub(crate) fn status_failed(url: &str, status: u16, body: &str) -> Error {
    Error::provider_failed(format!("server returned status {}: {}", status, truncate(body, 500)))
        .with_context("url", url)
        .with_context("status", status.to_string())
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}…", head)
    }
}
