//! Replay through an external process.
//!
//! Each case is written as JSON to the child's stdin; the child runs it
//! against the code under test and prints a [`ReplayOutcome`] as JSON on
//! stdout. Children are killed when their future is dropped, so a replay
//! cancelled by the verification timeout does not outlive it.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TestCase;
use crate::domain::ports::{ReplayOutcome, ReplayRuntime};

/// Replays cases by piping them as JSON to an external command.
#[derive(Debug, Clone)]
pub struct ProcessReplayRuntime {
    program: String,
    args: Vec<String>,
}

impl ProcessReplayRuntime {
    /// Runtime launching `program` with `args`.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace-separated command line.
    pub fn from_command_line(command: &str) -> DomainResult<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| DomainError::Configuration("replay command is empty".to_string()))?;
        Ok(Self::new(program, parts))
    }

    /// Executable the runtime launches.
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ReplayRuntime for ProcessReplayRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn replay(&self, case: &TestCase) -> DomainResult<ReplayOutcome> {
        let payload = serde_json::to_vec(case)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DomainError::ReplayFailed(format!("failed to spawn {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DomainError::ReplayFailed("failed to capture stdin".to_string()))?;
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DomainError::ReplayFailed(format!("failed to wait for replay: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::ReplayFailed(format!(
                "replay of {} exited with {}: {}",
                case.name,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(case = %case.name, bytes = output.stdout.len(), "replay finished");
        // The outcome is the last non-empty line; earlier lines are the
        // replayed code's own output.
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| DomainError::ReplayFailed(format!("replay of {} printed no outcome", case.name)))?;
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_parsing() {
        let runtime = ProcessReplayRuntime::from_command_line("java -jar replayer.jar").unwrap();
        assert_eq!(runtime.program(), "java");
        assert_eq!(runtime.args, vec!["-jar", "replayer.jar"]);
        assert!(ProcessReplayRuntime::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_outcome_is_read_from_last_stdout_line() {
        use crate::domain::models::{Assertion, Call, ExecutionId, MethodId};
        use std::collections::BTreeMap;

        let runtime = ProcessReplayRuntime::new(
            "sh",
            [
                "-c",
                r#"cat > /dev/null; echo noise; echo '{"outcome":"threw","exception":"java.lang.IllegalStateException"}'"#,
            ],
        );
        let case = TestCase::new(
            "testFail0".to_string(),
            ExecutionId(0),
            "com.acme.Gate".to_string(),
            String::new(),
            vec![],
            Call {
                method: MethodId(1),
                declaring_type: "com.acme.Gate".to_string(),
                name: "open".to_string(),
                receiver: None,
                args: vec![],
                constructor: false,
            },
            None,
            Assertion::Throws {
                exception: "java.lang.IllegalStateException".to_string(),
            },
            BTreeMap::new(),
            None,
        );
        let outcome = runtime.replay(&case).await.unwrap();
        assert_eq!(
            outcome,
            ReplayOutcome::Threw {
                exception: "java.lang.IllegalStateException".to_string()
            }
        );
    }
}
