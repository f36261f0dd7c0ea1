//! Pipeline data model: task, plan, code artifact, verdicts

use crate::parse::{self, Severity};
use agentchanti_llm::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The user's natural-language request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Task(String);

impl Task {
    pub fn new(description: impl Into<String>) -> Result<Self> {
        let description = description.into();
        let trimmed = description.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_argument("task description is empty")
                .with_operation("task::new"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub text: String,
    /// 0-based indices of the steps this one builds on
    pub depends_on: Vec<usize>,
}

/// Ordered steps produced by the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    /// Build a plan from raw step strings, resolving `(depends: N)` markers
    pub fn from_steps(steps: Vec<String>) -> Self {
        let (cleaned, deps) = parse::parse_step_dependencies(&steps);
        let steps = cleaned
            .into_iter()
            .zip(deps)
            .map(|(text, depends_on)| PlanStep { text, depends_on })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Numbered rendering used in prompts and terminal output.
    ///
    /// Dependencies are only spelled out when they differ from "the previous
    /// step".
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                let sequential = match idx {
                    0 => step.depends_on.is_empty(),
                    _ => step.depends_on == [idx - 1],
                };
                if sequential {
                    format!("{}. {}", idx + 1, step.text)
                } else if step.depends_on.is_empty() {
                    format!("{}. {} (independent)", idx + 1, step.text)
                } else {
                    let deps: Vec<String> =
                        step.depends_on.iter().map(|d| (d + 1).to_string()).collect();
                    format!("{}. {} (depends: {})", idx + 1, step.text, deps.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The coder's current candidate: filename -> content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeArtifact {
    version: u32,
    files: BTreeMap<String, String>,
}

impl CodeArtifact {
    pub fn new(version: u32, files: BTreeMap<String, String>) -> Self {
        Self { version, files }
    }

    /// A single-file artifact
    pub fn single(version: u32, filename: impl Into<String>, content: impl Into<String>) -> Self {
        let mut files = BTreeMap::new();
        files.insert(filename.into(), content.into());
        Self { version, files }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.files.get(filename).map(String::as_str)
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn has_test_files(&self) -> bool {
        self.files.keys().any(|name| parse::is_test_file(name))
    }

    /// Files in the `#### [FILE]: path` format the coder is asked to emit
    pub fn render_for_prompt(&self) -> String {
        self.files
            .iter()
            .map(|(name, content)| format!("#### [FILE]: {}\n```\n{}\n```", name, content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// What changed between `previous` and this version
    pub fn diff(&self, previous: &CodeArtifact) -> ArtifactDiff {
        let added = self
            .files
            .keys()
            .filter(|name| !previous.files.contains_key(*name))
            .cloned()
            .collect();
        let removed = previous
            .files
            .keys()
            .filter(|name| !self.files.contains_key(*name))
            .cloned()
            .collect();
        let changed = self
            .files
            .iter()
            .filter(|(name, content)| {
                previous
                    .files
                    .get(*name)
                    .is_some_and(|old| old != *content)
            })
            .map(|(name, _)| name.clone())
            .collect();

        ArtifactDiff {
            from_version: previous.version,
            to_version: self.version,
            added,
            removed,
            changed,
        }
    }
}

/// File-level difference between two artifact versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactDiff {
    pub from_version: u32,
    pub to_version: u32,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ArtifactDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl fmt::Display for ArtifactDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unchanged() {
            return write!(f, "v{} -> v{}: unchanged", self.from_version, self.to_version);
        }
        write!(f, "v{} -> v{}:", self.from_version, self.to_version)?;
        for name in &self.added {
            write!(f, " +{}", name)?;
        }
        for name in &self.removed {
            write!(f, " -{}", name)?;
        }
        for name in &self.changed {
            write!(f, " ~{}", name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("pass"),
            Verdict::Fail => f.write_str("fail"),
        }
    }
}

/// One tagged issue from the reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    #[serde(serialize_with = "serialize_severity")]
    pub severity: Severity,
    pub text: String,
}

fn serialize_severity<S: serde::Serializer>(
    severity: &Severity,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(severity.marker())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewResult {
    pub artifact_version: u32,
    pub verdict: Verdict,
    pub feedback: String,
    pub findings: Vec<Finding>,
}

impl ReviewResult {
    /// Judge reviewer feedback: any severity marker means fail
    pub fn from_feedback(artifact_version: u32, feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        let findings: Vec<Finding> = parse::find_severity_markers(&feedback)
            .into_iter()
            .map(|(severity, text)| Finding { severity, text })
            .collect();
        let verdict = if findings.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        Self {
            artifact_version,
            verdict,
            feedback,
            findings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub artifact_version: u32,
    pub verdict: Verdict,
    /// stdout followed by stderr
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// What the coder is told about its previous attempt
#[derive(Debug, Clone)]
pub enum Feedback {
    Review(ReviewResult),
    Test(TestResult),
}

impl Feedback {
    pub fn artifact_version(&self) -> u32 {
        match self {
            Feedback::Review(review) => review.artifact_version,
            Feedback::Test(test) => test.artifact_version,
        }
    }
}
