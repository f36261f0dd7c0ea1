//! Reviewer: code -> verdict + feedback

use crate::agent::Role;
use crate::artifact::{CodeArtifact, ReviewResult, Task};
use agentchanti_llm::{Error, Result};

const SYSTEM_PROMPT: &str = "You are a meticulous code reviewer. You only flag problems that \
must be fixed.";

#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub task: Task,
    pub artifact: CodeArtifact,
}

pub struct Reviewer {
    language: String,
}

impl Reviewer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

impl Role for Reviewer {
    type Input = ReviewInput;
    type Output = ReviewResult;

    fn name(&self) -> &'static str {
        "reviewer"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn render(&self, input: &ReviewInput) -> String {
        format!(
            "Task: {}\n\n\
             {} code to review:\n{}\n\n\
             Review the code for errors, bugs and missing requirements.\n\
             Put each problem that must be fixed on its own line, starting with a severity tag:\n\
             [CRITICAL] wrong results, crashes or the task not being implemented\n\
             [MAJOR] unhandled edge cases or broken error handling\n\
             [MINOR] smaller defects that still need a fix\n\
             Do not tag style suggestions. If nothing must be fixed, answer exactly: Code looks good.",
            input.task,
            self.language,
            input.artifact.render_for_prompt()
        )
    }

    fn parse(&self, input: &ReviewInput, response: &str) -> Result<ReviewResult> {
        if response.trim().is_empty() {
            return Err(Error::malformed_output("reviewer", "empty review")
                .with_operation("reviewer::parse"));
        }
        Ok(ReviewResult::from_feedback(
            input.artifact.version(),
            response.trim(),
        ))
    }
}
