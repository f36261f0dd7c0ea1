//! Scripted collaborators for pipeline tests

#![allow(dead_code)]

use agentchanti_agent::{TestResult, TestRunner, Verdict};
use agentchanti_llm::{CompletionRequest, CompletionResponse, Error, LlmProvider, Result, Usage};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub enum Reply {
    Text(String),
    Fail(Error),
    /// Never answers
    Hang,
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

/// Answers prompts from a fixed script, in order
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-coder"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(content)) => Ok(CompletionResponse {
                model: "scripted-coder".to_string(),
                usage: Usage::new(request.prompt.len(), content.len()),
                content,
            }),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::unexpected("hang finished"))
            }
            None => panic!("script exhausted at prompt:\n{}", request.prompt),
        }
    }
}

/// Returns verdicts from a list; the last one repeats
pub struct ScriptedRunner {
    verdicts: Mutex<VecDeque<Verdict>>,
    runs: Mutex<Vec<(PathBuf, u32)>>,
}

impl ScriptedRunner {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into()),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn always(verdict: Verdict) -> Self {
        Self::new(vec![verdict])
    }

    /// Artifact versions tested, in order
    pub fn versions(&self) -> Vec<u32> {
        self.runs.lock().unwrap().iter().map(|(_, v)| *v).collect()
    }
}

impl TestRunner for ScriptedRunner {
    async fn run(&self, workspace: &Path, artifact_version: u32) -> Result<TestResult> {
        self.runs
            .lock()
            .unwrap()
            .push((workspace.to_path_buf(), artifact_version));

        let verdict = {
            let mut verdicts = self.verdicts.lock().unwrap();
            if verdicts.len() > 1 {
                verdicts.pop_front().unwrap()
            } else {
                *verdicts.front().unwrap()
            }
        };

        let output = match verdict {
            Verdict::Pass => "1 passed".to_string(),
            Verdict::Fail => "FAILED test_calc.py::test_add - assert -1 == 5".to_string(),
        };
        Ok(TestResult {
            artifact_version,
            verdict,
            output,
            exit_code: Some(if verdict.is_pass() { 0 } else { 1 }),
            timed_out: false,
        })
    }
}

pub const TASK: &str = "write a function that adds two numbers";

pub const PLAN: &str = "1. Create calc.py with add(a, b)\n2. Add a pytest test for add";

pub const CODE_WITH_TESTS: &str = "#### [FILE]: calc.py
```python
def add(a, b):
    return a + b
```

#### [FILE]: test_calc.py
```python
from calc import add


def test_add():
    assert add(2, 3) == 5
```";

pub const CODE_ONLY: &str = "#### [FILE]: calc.py
```python
def add(a, b):
    return a + b
```";

pub const CODE_WITH_BROKEN_TEST: &str = "#### [FILE]: calc.py
```python
def add(a, b):
    return a + b
```

#### [FILE]: test_broken.py
```python
from calc import subtract
```";

pub const BUGGY_CODE: &str = "#### [FILE]: calc.py
```python
def add(a, b):
    return a - b
```";

pub const ADD_FIX_EDIT: &str = "#### [EDIT]: calc.py:add (lines 1-2)
```python
def add(a, b):
    return a + b
```";

pub const GENERATED_TESTS: &str = "#### [FILE]: test_calc.py
```python
from calc import add


def test_add():
    assert add(2, 3) == 5
```";

pub const LGTM: &str = "Code looks good.";
