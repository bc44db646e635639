//! Application service: branch mirroring with lease-protected pushes.

use anyhow::Result;

use crate::application::ports::{GitClient, ProgressReporter};
use crate::domain::error::MirrorError;
use crate::domain::mirror::{Lease, MirrorSpec, SyncOutcome, redact_url};

/// Options for a single sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Extra attempts after a lease conflict, each with a refreshed lease.
    pub retries: u32,
    /// Push with `--force` instead of a lease.
    pub force: bool,
}

/// Mirror `spec.branch` from `spec.source` to `spec.destination`.
///
/// # Errors
///
/// - `MirrorError::LeaseConflict` if the destination moved between reading
///   the lease and pushing, and no retries remain.
/// - `AuthenticationError` if either remote rejects the credentials.
pub async fn sync(
    git: &impl GitClient,
    reporter: &impl ProgressReporter,
    spec: &MirrorSpec,
    opts: SyncOptions,
) -> Result<SyncOutcome> {
    let source = redact_url(&spec.source);
    let destination = redact_url(&spec.destination);
    let branch = spec.branch.as_str();

    git.ensure_repository().await?;

    reporter.step(&format!("Fetching {branch} from {source}"));
    let head = git.fetch_branch(&spec.source, branch).await?;
    git.reset_branch(branch, &head).await?;
    tracing::debug!(%source, branch, head = %head, "source head");

    let mut attempt = 0;
    loop {
        let remote = git.remote_head(&spec.destination, branch).await?;
        if remote.as_ref() == Some(&head) {
            tracing::info!(%destination, branch, head = %head.short(), "destination up to date");
            return Ok(SyncOutcome::UpToDate { head });
        }

        let lease = Lease::new(remote.clone());
        if opts.force {
            reporter.step(&format!("Force pushing {branch} to {destination}"));
        } else {
            reporter.step(&format!(
                "Pushing {branch} to {destination} (expecting {})",
                lease.describe()
            ));
        }
        let pushed = git
            .push(
                &spec.destination,
                branch,
                (!opts.force).then_some(&lease),
            )
            .await;

        match pushed {
            Ok(()) => {
                tracing::info!(
                    %destination,
                    branch,
                    from = %lease.describe(),
                    to = %head.short(),
                    forced = opts.force,
                    "mirror push complete"
                );
                return Ok(SyncOutcome::Pushed {
                    from: remote,
                    to: head,
                    forced: opts.force,
                });
            }
            Err(e) if is_lease_conflict(&e) && attempt < opts.retries => {
                attempt += 1;
                reporter.warn(&format!(
                    "{destination} moved during push; retrying with a fresh lease ({attempt}/{})",
                    opts.retries
                ));
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_lease_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<MirrorError>(),
        Some(MirrorError::LeaseConflict { .. })
    )
}
