//! Orchestrator - drives one task through plan, code, review and test
//!
//! The pipeline is a small state machine:
//!
//! ```text
//! Planning -> Coding -> Reviewing -> Testing -> Done
//!                ^          |           |
//!                +-- Retry <+-----------+
//! ```
//!
//! Any stage can abort into `Failed`. Transitions are computed by the pure
//! [`next_stage`] function; [`Orchestrator::run`] performs the work of each
//! stage and feeds the resulting [`Event`] back in. Only one stage is ever
//! in flight and every LLM or test-runner call is awaited before the next
//! decision is made.

use crate::agent::Agent;
use crate::artifact::{
    ArtifactDiff, CodeArtifact, Feedback, Plan, ReviewResult, Task, TestResult,
};
use crate::config::OrchestratorConfig;
use crate::roles::{
    Coder, CoderInput, Planner, ReviewInput, Reviewer, Revision, TestWriter, TestWriterInput,
    Tester,
};
use crate::runner::TestRunner;
use crate::workspace::Workspace;
use agentchanti_llm::{Error, ErrorKind, LlmProvider, Result, UsageTracker};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Coding,
    Reviewing,
    Testing,
    Retry,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Coding => "coding",
            Stage::Reviewing => "reviewing",
            Stage::Testing => "testing",
            Stage::Retry => "retry",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the work done in a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    PlanReady,
    CodeReady,
    ReviewPassed,
    ReviewFailed,
    TestsPassed,
    TestsFailed,
    /// Leave `Retry` for another coder attempt
    Revise,
    /// Fatal error or cancellation
    Abort,
}

impl Event {
    /// Name of the gate a failing event came from
    pub fn gate(&self) -> &'static str {
        match self {
            Event::ReviewFailed => "review",
            Event::TestsFailed => "tests",
            _ => "pipeline",
        }
    }
}

/// Inputs to a transition besides the stage and event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Coder re-invocations used so far
    pub retries: usize,
    pub max_retries: usize,
    pub skip_review: bool,
}

/// The transition function.
///
/// Returns `None` when `event` cannot happen in `stage`; terminal stages
/// accept no events.
pub fn next_stage(stage: Stage, event: Event, policy: Policy) -> Option<Stage> {
    use Event::*;
    use Stage::*;

    let next = match (stage, event) {
        (Done | Failed, _) => return None,
        (_, Abort) => Failed,
        (Planning, PlanReady) => Coding,
        (Coding, CodeReady) if policy.skip_review => Testing,
        (Coding, CodeReady) => Reviewing,
        (Reviewing, ReviewPassed) => Testing,
        (Testing, TestsPassed) => Done,
        (Reviewing, ReviewFailed) | (Testing, TestsFailed) => {
            if policy.retries < policy.max_retries {
                Retry
            } else {
                Failed
            }
        }
        (Retry, Revise) => Coding,
        _ => return None,
    };
    Some(next)
}

// ============================================================================
// Run state and report
// ============================================================================

/// Mutable state of one run, owned by the orchestrator
#[derive(Debug)]
struct RunState {
    task: Task,
    stage: Stage,
    history: Vec<Stage>,
    retries: usize,
    coder_invocations: usize,
    plan: Option<Plan>,
    artifact: Option<CodeArtifact>,
    last_diff: Option<ArtifactDiff>,
    review: Option<ReviewResult>,
    test: Option<TestResult>,
    /// Feedback for the next coder attempt
    feedback: Option<Feedback>,
    generated_tests: Option<BTreeMap<String, String>>,
}

impl RunState {
    fn new(task: Task) -> Self {
        Self {
            task,
            stage: Stage::Planning,
            history: vec![Stage::Planning],
            retries: 0,
            coder_invocations: 0,
            plan: None,
            artifact: None,
            last_diff: None,
            review: None,
            test: None,
            feedback: None,
            generated_tests: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.history.push(stage);
    }

    fn current_artifact(&self) -> Result<CodeArtifact> {
        self.artifact
            .clone()
            .ok_or_else(|| Error::unexpected("no artifact to evaluate"))
    }

    fn next_version(&self) -> u32 {
        self.artifact.as_ref().map_or(1, |a| a.version() + 1)
    }

    /// Install a new artifact; it has not been reviewed or tested yet
    fn replace_artifact(&mut self, artifact: CodeArtifact) {
        if let Some(previous) = &self.artifact {
            let diff = artifact.diff(previous);
            info!(%diff, "artifact revised");
            self.last_diff = Some(diff);
        }
        self.artifact = Some(artifact);
        self.review = None;
        self.test = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    RetryExhausted,
    FatalAbort,
    Cancelled,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Done => 0,
            Outcome::RetryExhausted => 1,
            Outcome::FatalAbort => 2,
            Outcome::Cancelled => 130,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Done => "done",
            Outcome::RetryExhausted => "retry budget exhausted",
            Outcome::FatalAbort => "aborted",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Serializable digest of the error that ended a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub kind: String,
    /// Kind of the underlying error for fatal aborts
    pub cause: Option<String>,
    pub stage: Option<String>,
    pub message: String,
}

impl FailureSummary {
    fn from_error(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            cause: err.cause_kind().map(|k| k.to_string()),
            stage: err
                .context_value("stage")
                .or_else(|| err.context_value("gate"))
                .map(str::to_string),
            message: err.message().to_string(),
        }
    }
}

/// Everything a caller needs after a run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub task: Task,
    pub outcome: Outcome,
    pub plan: Option<Plan>,
    pub artifact: Option<CodeArtifact>,
    pub last_diff: Option<ArtifactDiff>,
    pub review: Option<ReviewResult>,
    pub test: Option<TestResult>,
    pub generated_tests: Vec<String>,
    pub retries: usize,
    pub coder_invocations: usize,
    pub history: Vec<Stage>,
    pub usage: UsageTracker,
    pub failure: Option<FailureSummary>,
    #[serde(skip)]
    pub error: Option<Error>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Done
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives a task through the pipeline
pub struct Orchestrator<P, R> {
    agent: Agent<P>,
    tester: Tester<R>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl<P: LlmProvider, R: TestRunner> Orchestrator<P, R> {
    pub fn new(provider: P, runner: R, config: OrchestratorConfig) -> Self {
        let workspace = Workspace::new(config.workspace_dir.clone());
        Self {
            agent: Agent::new(provider),
            tester: Tester::new(workspace, runner),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn agent(&self) -> &Agent<P> {
        &self.agent
    }

    pub fn tester(&self) -> &Tester<R> {
        &self.tester
    }

    /// Run `task` to a terminal stage. Never panics on pipeline failures;
    /// the outcome is in the report.
    pub async fn run(&mut self, task: Task) -> RunReport {
        info!(task = %task, max_retries = self.config.max_retries, "starting run");
        let mut state = RunState::new(task);
        let result = match self.config.validate() {
            Ok(()) => self.drive(&mut state).await,
            Err(err) => Err(self.abort(&mut state, err)),
        };
        self.finish(state, result)
    }

    fn policy(&self, state: &RunState) -> Policy {
        Policy {
            retries: state.retries,
            max_retries: self.config.max_retries,
            skip_review: self.config.skip_review,
        }
    }

    /// Take the `Abort` edge out of the current stage and wrap `err` for the
    /// report. Cancellation stays `Cancelled`; anything else becomes a
    /// `FatalAbort` naming the stage.
    fn abort(&self, state: &mut RunState, err: Error) -> Error {
        let stage = state.stage;
        let next = next_stage(stage, Event::Abort, self.policy(state)).unwrap_or(Stage::Failed);
        state.enter(next);

        if err.kind() == ErrorKind::Cancelled {
            warn!(stage = %stage, "run cancelled");
            return err;
        }
        error!(stage = %stage, error = %err, "stage failed");
        Error::fatal_abort(stage.as_str(), err)
    }

    async fn drive(&mut self, state: &mut RunState) -> Result<()> {
        loop {
            let stage = state.stage;
            if stage == Stage::Done {
                return Ok(());
            }

            let step = if self.cancel.is_cancelled() {
                Err(Error::cancelled(stage.as_str()))
            } else {
                self.step(state, stage).await
            };
            let event = match step {
                Ok(event) => event,
                Err(err) => return Err(self.abort(state, err)),
            };

            let Some(next) = next_stage(stage, event, self.policy(state)) else {
                let err = Error::unexpected(format!("no transition from {} on {:?}", stage, event));
                return Err(self.abort(state, err));
            };

            info!(from = %stage, to = %next, retry = state.retries, "stage transition");
            state.enter(next);

            if next == Stage::Failed {
                return Err(Error::retry_exhausted(self.config.max_retries, event.gate())
                    .with_operation("orchestrator::run"));
            }
        }
    }

    async fn step(&mut self, state: &mut RunState, stage: Stage) -> Result<Event> {
        match stage {
            Stage::Planning => {
                let plan = guarded(&self.cancel, stage, self.agent.run(&Planner, &state.task)).await?;
                info!(steps = plan.len(), "plan ready");
                state.plan = Some(plan);
                Ok(Event::PlanReady)
            }
            Stage::Coding => {
                let plan = state
                    .plan
                    .clone()
                    .ok_or_else(|| Error::unexpected("coding without a plan"))?;
                let revision = match (state.artifact.clone(), state.feedback.take()) {
                    (Some(artifact), Some(feedback)) => Some(Revision { artifact, feedback }),
                    _ => None,
                };
                let input = CoderInput {
                    task: state.task.clone(),
                    plan,
                    revision,
                };

                state.coder_invocations += 1;
                let coder = Coder::new(&self.config);
                let files = guarded(&self.cancel, stage, self.agent.run(&coder, &input)).await?;

                let artifact = CodeArtifact::new(state.next_version(), files);
                info!(
                    version = artifact.version(),
                    files = ?artifact.file_names(),
                    "artifact ready"
                );
                state.replace_artifact(artifact);
                Ok(Event::CodeReady)
            }
            Stage::Reviewing => {
                let input = ReviewInput {
                    task: state.task.clone(),
                    artifact: state.current_artifact()?,
                };
                let reviewer = Reviewer::new(self.config.language.clone());
                let review = guarded(&self.cancel, stage, self.agent.run(&reviewer, &input)).await?;

                let event = if review.verdict.is_pass() {
                    info!(version = review.artifact_version, "review passed");
                    Event::ReviewPassed
                } else {
                    warn!(
                        version = review.artifact_version,
                        findings = review.findings.len(),
                        "review failed"
                    );
                    state.feedback = Some(Feedback::Review(review.clone()));
                    Event::ReviewFailed
                };
                state.review = Some(review);
                Ok(event)
            }
            Stage::Testing => {
                let artifact = state.current_artifact()?;

                if self.config.generate_tests
                    && state.generated_tests.is_none()
                    && !artifact.has_test_files()
                {
                    let writer = TestWriter::new(self.config.language.clone(), &self.config.test_command);
                    let input = TestWriterInput {
                        task: state.task.clone(),
                        artifact: artifact.clone(),
                    };
                    let tests = guarded(&self.cancel, stage, self.agent.run(&writer, &input)).await?;
                    if tests.is_empty() {
                        warn!("model produced no test files");
                    } else {
                        info!(files = ?tests.keys().collect::<Vec<_>>(), "generated tests");
                    }
                    state.generated_tests = Some(tests);
                }

                let no_tests = BTreeMap::new();
                let extra = state.generated_tests.as_ref().unwrap_or(&no_tests);
                let result = guarded(&self.cancel, stage, self.tester.test(&artifact, extra)).await?;

                let event = if result.verdict.is_pass() {
                    Event::TestsPassed
                } else {
                    warn!(
                        version = result.artifact_version,
                        timed_out = result.timed_out,
                        exit_code = ?result.exit_code,
                        "tests failed"
                    );
                    state.feedback = Some(Feedback::Test(result.clone()));
                    Event::TestsFailed
                };
                state.test = Some(result);
                Ok(event)
            }
            Stage::Retry => {
                state.retries += 1;
                warn!(
                    retry = state.retries,
                    max_retries = self.config.max_retries,
                    "sending feedback back to the coder"
                );
                Ok(Event::Revise)
            }
            Stage::Done | Stage::Failed => Err(Error::unexpected(format!(
                "no work in terminal stage {}",
                stage
            ))),
        }
    }

    fn finish(&mut self, state: RunState, result: Result<()>) -> RunReport {
        let usage = self.agent.take_usage();
        let outcome = match &result {
            Ok(()) => Outcome::Done,
            Err(err) => match err.kind() {
                ErrorKind::RetryExhausted => Outcome::RetryExhausted,
                ErrorKind::Cancelled => Outcome::Cancelled,
                _ => Outcome::FatalAbort,
            },
        };

        match &result {
            Ok(()) => info!(
                retries = state.retries,
                coder_invocations = state.coder_invocations,
                tokens = usage.total_tokens(),
                "run finished"
            ),
            Err(err) => warn!(%outcome, error = %err, "run failed"),
        }

        let error = result.err();
        let failure = error.as_ref().map(FailureSummary::from_error);

        if outcome == Outcome::Cancelled {
            return RunReport {
                task: state.task,
                outcome,
                plan: None,
                artifact: None,
                last_diff: None,
                review: None,
                test: None,
                generated_tests: Vec::new(),
                retries: state.retries,
                coder_invocations: state.coder_invocations,
                history: state.history,
                usage,
                failure,
                error,
            };
        }

        RunReport {
            task: state.task,
            outcome,
            plan: state.plan,
            artifact: state.artifact,
            last_diff: state.last_diff,
            review: state.review,
            test: state.test,
            generated_tests: state
                .generated_tests
                .map(|tests| tests.into_keys().collect())
                .unwrap_or_default(),
            retries: state.retries,
            coder_invocations: state.coder_invocations,
            history: state.history,
            usage,
            failure,
            error,
        }
    }
}

/// Await `call` unless the run is cancelled first. A cancelled call's result
/// is dropped.
async fn guarded<T, F>(cancel: &CancellationToken, stage: Stage, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(stage.as_str()));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(stage.as_str()).with_operation("orchestrator::run")),
        result = call => result,
    }
}
