//! Test runner collaborator
//!
//! The runner executes whatever tests live in the workspace and reports
//! pass/fail with the captured output. A failing test suite is a normal
//! verdict; only a runner that cannot run at all is an error.

use crate::artifact::{TestResult, Verdict};
use agentchanti_llm::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Executes tests against a materialised workspace
#[allow(async_fn_in_trait)]
pub trait TestRunner {
    /// Run the tests in `workspace` for the given artifact version
    async fn run(&self, workspace: &Path, artifact_version: u32) -> Result<TestResult>;
}

/// Kills the whole process group of a spawned test command when dropped.
///
/// `kill_on_drop` only reaches `sh` itself; anything it backgrounded would
/// outlive a timeout or a cancelled run without this.
struct GroupKill {
    pgid: Option<i32>,
}

impl GroupKill {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    // SAFETY: signalling a process group we created has no memory effects.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

/// Runs a shell command (`sh -c`) inside the workspace
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: String,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl TestRunner for CommandTestRunner {
    async fn run(&self, workspace: &Path, artifact_version: u32) -> Result<TestResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = %self.command, workspace = %workspace.display(), "running tests");

        let child = cmd.spawn().map_err(|e| {
            Error::test_runner_failed(&self.command, format!("failed to spawn: {}", e))
                .with_operation("runner::run")
                .with_context("workspace", workspace.display().to_string())
                .set_source(e)
        })?;

        let mut group = GroupKill {
            pgid: child.id().and_then(|pid| i32::try_from(pid).ok()),
        };

        // Dropping the output future on timeout kills the child, the guard
        // takes the rest of its group.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| {
                Error::test_runner_failed(&self.command, format!("failed to collect output: {}", e))
                    .with_operation("runner::run")
                    .set_source(e)
            })?,
            Err(_) => {
                warn!(command = %self.command, timeout = ?self.timeout, "test run timed out");
                return Ok(TestResult {
                    artifact_version,
                    verdict: Verdict::Fail,
                    output: format!(
                        "test command `{}` timed out after {:?}",
                        self.command, self.timeout
                    ),
                    exit_code: None,
                    timed_out: true,
                });
            }
        };

        group.disarm();

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let verdict = if output.status.success() {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        debug!(exit_code = ?output.status.code(), %verdict, "tests finished");

        Ok(TestResult {
            artifact_version,
            verdict,
            output: text.trim().to_string(),
            exit_code: output.status.code(),
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchanti_llm::ErrorKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_passing_command() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("echo collected 1 item; echo ok >&2", Duration::from_secs(10));

        let result = runner.run(dir.path(), 4).await.unwrap();
        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.artifact_version, 4);
        assert_eq!(result.output, "collected 1 item\nok");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("echo 'assert 1 == 5'; exit 1", Duration::from_secs(10));

        let result = runner.run(dir.path(), 1).await.unwrap();
        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.output.contains("assert 1 == 5"));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let runner = CommandTestRunner::new("cat marker.txt", Duration::from_secs(10));

        let result = runner.run(dir.path(), 1).await.unwrap();
        assert_eq!(result.output, "here");
    }

    #[tokio::test]
    async fn test_timeout_is_failing_result() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("sleep 5", Duration::from_millis(100));

        let result = runner.run(dir.path(), 2).await.unwrap();
        assert_eq!(result.verdict, Verdict::Fail);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // zombies wait for reaping by init and count as gone
            Ok(stat) => !stat
                .rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new(
            "sleep 30 & echo $! > child.pid; wait",
            Duration::from_millis(300),
        );

        let result = runner.run(dir.path(), 1).await.unwrap();
        assert!(result.timed_out);

        let pid = std::fs::read_to_string(dir.path().join("child.pid")).unwrap();
        let pid = pid.trim().to_string();
        let mut gone = false;
        for _ in 0..50 {
            if !is_running(&pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "background child {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_missing_workspace_is_runner_error() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new("true", Duration::from_secs(10));

        let err = runner.run(&dir.path().join("missing"), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TestRunnerFailed);
        assert_eq!(err.context_value("command"), Some("true"));
    }
}
