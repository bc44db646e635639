//! `infrasync mirror`: mirror a branch between Git remotes.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::app::AppContext;
use crate::application::services::mirror_sync::{self, SyncOptions};
use crate::domain::mirror::{MirrorSpec, redact_url};
use crate::infra::paths;

/// Mirror subcommands.
#[derive(Subcommand)]
pub enum MirrorCommand {
    /// Push the source branch head to the destination with a lease
    Sync(SyncArgs),
}

/// Arguments for `mirror sync`.
#[derive(Args)]
pub struct SyncArgs {
    /// Source remote URL or path
    pub source: String,
    /// Destination remote URL or path
    pub destination: String,
    /// Branch to mirror
    #[arg(short, long, default_value = "main")]
    pub branch: String,
    /// Overwrite the destination branch without a lease
    #[arg(long)]
    pub force: bool,
    /// Lease-conflict retries (default: `mirror.retries`)
    #[arg(long)]
    pub retries: Option<u32>,
    /// Use a throwaway local repository instead of the mirror cache
    #[arg(long)]
    pub ephemeral: bool,
}

/// Run the mirror command.
///
/// # Errors
///
/// Returns `LeaseConflict` when the destination moved concurrently and
/// `AuthenticationError` when a remote rejects credentials.
pub async fn run(app: &AppContext, cmd: MirrorCommand) -> Result<ExitCode> {
    match cmd {
        MirrorCommand::Sync(args) => sync(app, &args).await,
    }
}

async fn sync(app: &AppContext, args: &SyncArgs) -> Result<ExitCode> {
    let spec = MirrorSpec::new(&args.source, &args.destination, &args.branch)?;
    if args.force
        && !app.approve(&format!(
            "Force push {} to {}? Commits only on the destination will be lost.",
            spec.branch,
            redact_url(&spec.destination)
        ))?
    {
        app.output.info("Nothing pushed.");
        return Ok(ExitCode::SUCCESS);
    }

    let opts = SyncOptions {
        retries: args.retries.unwrap_or(app.config.mirror.retries),
        force: args.force,
    };
    // Keep the temp dir alive until the sync finishes.
    let (_scratch, repo) = if args.ephemeral {
        let dir = tempfile::Builder::new()
            .prefix("infrasync-mirror-")
            .tempdir()
            .context("creating temporary mirror repository")?;
        let repo = dir.path().join("mirror.git");
        (Some(dir), repo)
    } else {
        let repo = paths::mirror_cache_dir(&app.config)?.join(paths::mirror_repo_name(&spec.destination));
        (None, repo)
    };
    let git = app.git_client(repo);

    let reporter = app.reporter().with_spinner(&format!("Syncing {}", spec.branch));
    let outcome = mirror_sync::sync(&git, &reporter, &spec, opts).await;
    reporter.clear();
    app.renderer().render_sync(&spec, &outcome?)?;
    Ok(ExitCode::SUCCESS)
}
