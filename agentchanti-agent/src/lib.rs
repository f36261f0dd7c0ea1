//! # AgentChanti Agent
//!
//! Turns a natural-language coding task into working code with a fixed
//! pipeline of LLM roles:
//! 1. Planner breaks the task into numbered steps
//! 2. Coder writes the files
//! 3. Reviewer gates the code on severity-tagged findings
//! 4. Tester writes the files to disk and runs the test command
//! 5. Review or test failures go back to the Coder until the retry budget
//!    runs out
//!
//! Everything runs strictly one call at a time. The [`Orchestrator`] owns the
//! run state; roles are stateless prompt/parse strategies executed by a
//! shared [`Agent`].

mod agent;
mod artifact;
pub mod chunk;
mod config;
mod orchestrator;
pub mod parse;
mod roles;
mod runner;
mod workspace;

pub use agent::{Agent, Role};
pub use artifact::{
    ArtifactDiff, CodeArtifact, Feedback, Finding, Plan, PlanStep, ReviewResult, Task,
    TestResult, Verdict,
};
pub use config::OrchestratorConfig;
pub use orchestrator::{
    next_stage, Event, FailureSummary, Orchestrator, Outcome, Policy, RunReport, Stage,
};
pub use roles::{
    Coder, CoderInput, Planner, ReviewInput, Reviewer, Revision, TestWriter, TestWriterInput,
    Tester,
};
pub use runner::{CommandTestRunner, TestRunner};
pub use workspace::Workspace;

pub use tokio_util::sync::CancellationToken;
