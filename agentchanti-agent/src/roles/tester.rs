//! Tester: materialise the artifact and run its tests
//!
//! [`TestWriter`] is the LLM half, used when the coder shipped no tests.
//! [`Tester`] is the execution half: it writes files into the workspace and
//! hands the run to a [`TestRunner`].

use crate::agent::Role;
use crate::artifact::{CodeArtifact, Task, TestResult};
use crate::parse;
use crate::runner::TestRunner;
use crate::workspace::Workspace;
use agentchanti_llm::Result;
use std::collections::BTreeMap;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are a test engineer. You write focused, deterministic unit tests.";

#[derive(Debug, Clone)]
pub struct TestWriterInput {
    pub task: Task,
    pub artifact: CodeArtifact,
}

/// Asks the model for test files covering the artifact
pub struct TestWriter {
    language: String,
    framework: String,
}

impl TestWriter {
    pub fn new(language: impl Into<String>, test_command: &str) -> Self {
        let framework = test_command
            .split_whitespace()
            .next()
            .unwrap_or("pytest")
            .to_string();
        Self {
            language: language.into(),
            framework,
        }
    }
}

impl Role for TestWriter {
    type Input = TestWriterInput;
    type Output = BTreeMap<String, String>;

    fn name(&self) -> &'static str {
        "test_writer"
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }

    fn render(&self, input: &TestWriterInput) -> String {
        format!(
            "Task: {}\n\n\
             Code under test:\n{}\n\n\
             Generate {} unit tests for the code above using the `{}` framework.\n\
             Import the code from the files shown; do not redefine it.\n\
             Give every test file a header line followed by a fenced code block:\n\
             #### [FILE]: test_example.py\n\
             ```{}\n\
             # test code here\n\
             ```\n\
             Cover the behaviour described in the task, including edge cases.",
            input.task,
            input.artifact.render_for_prompt(),
            self.language,
            self.framework,
            self.language
        )
    }

    /// Only test files are kept; a model that rewrites the code under test
    /// does not get to replace it.
    fn parse(&self, _input: &TestWriterInput, response: &str) -> Result<BTreeMap<String, String>> {
        let files: BTreeMap<String, String> = parse::parse_code_blocks(response)
            .into_iter()
            .filter(|(name, _)| parse::is_test_file(name))
            .collect();
        Ok(files)
    }
}

/// Writes artifacts into the workspace and runs the test command
pub struct Tester<R> {
    workspace: Workspace,
    runner: R,
}

impl<R: TestRunner> Tester<R> {
    pub fn new(workspace: Workspace, runner: R) -> Self {
        Self { workspace, runner }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Sync the workspace to `artifact` plus any `extra_tests` and run the
    /// tests.
    ///
    /// Artifact files win over generated tests with the same path. Files an
    /// earlier version wrote that are not part of this one are removed first.
    pub async fn test(
        &self,
        artifact: &CodeArtifact,
        extra_tests: &BTreeMap<String, String>,
    ) -> Result<TestResult> {
        let mut files = extra_tests.clone();
        files.extend(
            artifact
                .files()
                .iter()
                .map(|(name, content)| (name.clone(), content.clone())),
        );
        let written = self.workspace.sync_files(&files).await?;
        debug!(
            version = artifact.version(),
            files = written.len(),
            generated_tests = files.len() - artifact.files().len(),
            "workspace ready"
        );

        let result = self
            .runner
            .run(self.workspace.root(), artifact.version())
            .await?;
        info!(version = artifact.version(), verdict = %result.verdict, "tests finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandTestRunner;
    use crate::artifact::Verdict;
    use std::time::Duration;
    use tempfile::TempDir;

    fn writer_input() -> TestWriterInput {
        TestWriterInput {
            task: Task::new("write a function that adds two numbers").unwrap(),
            artifact: CodeArtifact::single(1, "calc.py", "def add(a, b):\n    return a + b"),
        }
    }

    #[test]
    fn test_writer_keeps_only_test_files() {
        let response = "#### [FILE]: test_calc.py\n```python\nfrom calc import add\n\ndef test_add():\n    assert add(2, 3) == 5\n```\n\n\
                        #### [FILE]: calc.py\n```python\ndef add(a, b): return 5\n```";
        let files = TestWriter::new("python", "pytest -q")
            .parse(&writer_input(), response)
            .unwrap();

        assert_eq!(files.len(), 1);
        assert!(files["test_calc.py"].contains("assert add(2, 3) == 5"));
    }

    #[test]
    fn test_writer_prompt_names_framework() {
        let prompt = TestWriter::new("python", "python -m unittest").render(&writer_input());
        assert!(prompt.contains("using the `python` framework"));
        assert!(prompt.contains("#### [FILE]: calc.py"));
    }

    #[tokio::test]
    async fn test_tester_writes_and_runs() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("test -f calc.py && test -f test_calc.py", Duration::from_secs(10));
        let tester = Tester::new(Workspace::new(dir.path()), runner);

        let mut tests = BTreeMap::new();
        tests.insert("test_calc.py".to_string(), "assert True".to_string());
        let artifact = CodeArtifact::single(1, "calc.py", "def add(a, b): return a + b");

        let result = tester.test(&artifact, &tests).await.unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_artifact_wins_over_generated_test() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("cat test_calc.py", Duration::from_secs(10));
        let tester = Tester::new(Workspace::new(dir.path()), runner);

        let mut generated = BTreeMap::new();
        generated.insert("test_calc.py".to_string(), "generated".to_string());
        let mut files = BTreeMap::new();
        files.insert("calc.py".to_string(), "code".to_string());
        files.insert("test_calc.py".to_string(), "shipped".to_string());
        let artifact = CodeArtifact::new(2, files);

        let result = tester.test(&artifact, &generated).await.unwrap();
        assert_eq!(result.output, "shipped");
    }

    #[tokio::test]
    async fn test_dropped_files_do_not_reach_the_next_run() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("ls; test ! -e test_broken.py", Duration::from_secs(10));
        let tester = Tester::new(Workspace::new(dir.path()), runner);

        let mut generated = BTreeMap::new();
        generated.insert("test_generated.py".to_string(), "assert True".to_string());

        let mut v1 = BTreeMap::new();
        v1.insert("calc.py".to_string(), "def add(a, b): return a - b".to_string());
        v1.insert("test_broken.py".to_string(), "assert False".to_string());
        let result = tester.test(&CodeArtifact::new(1, v1), &generated).await.unwrap();
        assert_eq!(result.verdict, Verdict::Fail);

        let v2 = CodeArtifact::single(2, "calc.py", "def add(a, b): return a + b");
        let result = tester.test(&v2, &generated).await.unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.output, "calc.py\ntest_generated.py");
    }
}
