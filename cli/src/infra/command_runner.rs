//! Process execution behind the `CommandRunner` port.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::application::ports::CommandRunner;

/// Runs child processes with a hard deadline and a fixed extra environment.
///
/// `tokio::time::timeout` around `.output()` drops the future but leaves the
/// process running on some platforms, so the deadline branch kills the child
/// explicitly.
pub struct TokioCommandRunner {
    deadline: Duration,
    envs: Vec<(String, String)>,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            envs: Vec::new(),
        }
    }

    /// Set an environment variable on every spawned process.
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        // A broken pipe still leaves whatever was read so far.
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        // Arguments may carry remote URLs with credentials; log the program only.
        tracing::debug!(program, argc = args.len(), "spawning");
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::select! {
            (status, stdout, stderr) = async {
                tokio::join!(child.wait(), drain(stdout), drain(stderr))
            } => Ok(Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            }),
            () = tokio::time::sleep(self.deadline) => {
                let _ = child.kill().await;
                tracing::warn!(program, deadline_secs = self.deadline.as_secs(), "process killed at deadline");
                anyhow::bail!("{program} timed out after {}s", self.deadline.as_secs())
            }
        }
    }
}
