//! Planner: task -> numbered plan

use crate::agent::Role;
use crate::artifact::{Plan, Task};
use crate::parse;
use agentchanti_llm::{Error, Result};

const SYSTEM_PROMPT: &str = "You are a senior software engineer who breaks programming tasks \
into short, actionable implementation steps.";

pub struct Planner;

impl Role for Planner {
    type Input = Task;
    type Output = Plan;

    fn name(&self) -> &'static str {
        "planner"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn render(&self, task: &Task) -> String {
        format!(
            "Task: {}\n\n\
             Provide a step-by-step plan as a numbered list.\n\
             Keep each step short and actionable. Do NOT include code in this plan.\n\
             If a step only builds on specific earlier steps, end it with \
             \"(depends: N)\" listing their numbers.",
            task
        )
    }

    fn parse(&self, _task: &Task, response: &str) -> Result<Plan> {
        let steps = parse::parse_plan_steps(response);
        if steps.is_empty() {
            return Err(Error::malformed_output("planner", "no numbered steps found")
                .with_operation("planner::parse"));
        }
        Ok(Plan::from_steps(steps))
    }

    fn reprompt(&self, task: &Task) -> Option<String> {
        Some(format!(
            "Task: {}\n\n\
             Your previous answer could not be read as a plan.\n\
             Answer ONLY with a numbered list, one step per line, in exactly this form:\n\
             1. First step\n\
             2. Second step\n\
             No introduction, no code, no closing remarks.",
            task
        ))
    }
}
