//! `GitClient` implementation that drives the `git` executable through a
//! [`CommandRunner`].
//!
//! All work happens in a bare mirror repository. Source heads are fetched
//! into `refs/infrasync/source/<branch>` so the local `refs/heads/<branch>`
//! only ever moves through [`GitClient::reset_branch`].

use std::path::PathBuf;
use std::process::Output;

use anyhow::{Context, Result};

use crate::application::ports::{CommandRunner, GitClient};
use crate::domain::error::{AuthenticationError, MirrorError};
use crate::domain::mirror::{
    CommitId, GitFailure, Lease, classify_git_failure, parse_ls_remote, redact_url,
};

/// Git client bound to one bare mirror repository.
pub struct GitCli<R> {
    runner: R,
    repo: PathBuf,
}

impl<R: CommandRunner> GitCli<R> {
    #[must_use]
    pub fn new(runner: R, repo: PathBuf) -> Self {
        Self { runner, repo }
    }

    async fn git(&self, args: &[&str]) -> Result<Output> {
        let git_dir = self.repo.to_string_lossy().into_owned();
        let mut full = vec!["--git-dir", git_dir.as_str()];
        full.extend_from_slice(args);
        self.runner.run("git", &full).await
    }

    /// Run git and map a non-zero exit to a typed error for `remote`.
    async fn git_checked(&self, command: &str, remote: Option<&str>, args: &[&str]) -> Result<Output> {
        let output = self.git(args).await.with_context(|| format!("git {command}"))?;
        if output.status.success() {
            return Ok(output);
        }
        Err(failure(command, remote, &output))
    }
}

/// Redact every URL-looking token in git's diagnostic output.
fn redact_text(text: &str) -> String {
    text.split_inclusive(char::is_whitespace)
        .map(|token| {
            let trimmed = token.trim_end();
            if trimmed.contains("://") {
                let quoted = trimmed.trim_matches(|c| c == '\'' || c == '"');
                token.replacen(quoted, &redact_url(quoted), 1)
            } else {
                token.to_string()
            }
        })
        .collect()
}

fn failure(command: &str, remote: Option<&str>, output: &Output) -> anyhow::Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let combined = format!("{stderr}\n{stdout}");
    let detail = redact_text(stderr.trim());
    let remote = remote.map(redact_url).unwrap_or_default();
    tracing::debug!(command, remote = %remote, stderr = %detail, "git failed");

    match classify_git_failure(&combined) {
        GitFailure::Authentication => AuthenticationError {
            remote,
            detail: first_line(&detail),
        }
        .into(),
        _ => MirrorError::GitFailed {
            command: command.to_string(),
            stderr: detail,
        }
        .into(),
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("credentials rejected")
        .trim()
        .to_string()
}

impl<R: CommandRunner> GitClient for GitCli<R> {
    async fn ensure_repository(&self) -> Result<()> {
        if self.repo.join("HEAD").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.repo)
            .await
            .with_context(|| format!("creating mirror repository {}", self.repo.display()))?;
        let repo = self.repo.to_string_lossy().into_owned();
        let output = self
            .runner
            .run("git", &["init", "--bare", "--quiet", &repo])
            .await
            .context("git init")?;
        if !output.status.success() {
            return Err(failure("init", None, &output));
        }
        tracing::info!(repo = %self.repo.display(), "initialized mirror repository");
        Ok(())
    }

    async fn fetch_branch(&self, remote: &str, branch: &str) -> Result<CommitId> {
        let tracking = format!("refs/infrasync/source/{branch}");
        let refspec = format!("+refs/heads/{branch}:{tracking}");
        let fetched = self
            .git_checked(
                "fetch",
                Some(remote),
                &["fetch", "--quiet", "--no-tags", remote, &refspec],
            )
            .await;
        if let Err(e) = fetched {
            if let Some(MirrorError::GitFailed { stderr, .. }) = e.downcast_ref::<MirrorError>()
                && classify_git_failure(stderr) == GitFailure::MissingRef
            {
                return Err(MirrorError::BranchNotFound {
                    remote: redact_url(remote),
                    branch: branch.to_string(),
                }
                .into());
            }
            return Err(e);
        }

        let spec = format!("{tracking}^{{commit}}");
        let output = self
            .git_checked("rev-parse", None, &["rev-parse", "--verify", &spec])
            .await?;
        CommitId::parse(&String::from_utf8_lossy(&output.stdout))
    }

    async fn reset_branch(&self, branch: &str, commit: &CommitId) -> Result<()> {
        let local = format!("refs/heads/{branch}");
        self.git_checked("update-ref", None, &["update-ref", &local, commit.as_str()])
            .await?;
        Ok(())
    }

    async fn remote_head(&self, remote: &str, branch: &str) -> Result<Option<CommitId>> {
        let pattern = format!("refs/heads/{branch}");
        let output = self
            .git_checked("ls-remote", Some(remote), &["ls-remote", "--heads", remote, &pattern])
            .await?;
        parse_ls_remote(&String::from_utf8_lossy(&output.stdout), branch)
    }

    async fn push(&self, remote: &str, branch: &str, lease: Option<&Lease>) -> Result<()> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let mode = lease.map_or_else(|| "--force".to_string(), |l| l.as_push_arg(branch));
        let output = self
            .git(&["push", "--porcelain", &mode, remote, &refspec])
            .await
            .context("git push")?;
        if output.status.success() {
            return Ok(());
        }
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout)
        );
        if let Some(lease) = lease
            && classify_git_failure(&combined) == GitFailure::LeaseRejected
        {
            return Err(MirrorError::LeaseConflict {
                remote: redact_url(remote),
                branch: branch.to_string(),
                expected: lease.describe(),
            }
            .into());
        }
        Err(failure("push", Some(remote), &output))
    }
}
