//! # agentchanti-error
//!
//! The one error type used across AgentChanti: the LLM client, the agent
//! roles, the orchestrator and the CLI all return [`Result`].
//!
//! An [`Error`] answers three questions. [`ErrorKind`] says what failed.
//! [`ErrorStatus`] says whether trying again could help. The operation and
//! context annotations say where it happened.
//!
//! ```rust
//! use agentchanti_error::{Error, ErrorKind, Result};
//!
//! fn first_step(answer: &str) -> Result<&str> {
//!     answer.lines().next().ok_or_else(|| {
//!         Error::malformed_output("planner", "empty answer")
//!             .with_operation("planner::parse")
//!     })
//! }
//!
//! let err = first_step("").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::MalformedOutput);
//! assert_eq!(err.context_value("role"), Some("planner"));
//! ```
//!
//! Foreign errors go in through [`Error::set_source`]. Code that merely
//! passes an error along adds context instead of re-wrapping it.

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

pub type Result<T> = std::result::Result<T, Error>;
