//! `infrasync artifacts`: list and prune stored plans.

use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use crate::app::AppContext;
use crate::application::ports::ArtifactStore;
use crate::application::services::plan_apply;

/// Artifacts subcommands.
#[derive(Subcommand)]
pub enum ArtifactsCommand {
    /// List stored plan artifacts
    List,
    /// Delete expired plan artifacts
    Prune,
}

/// Run the artifacts command.
///
/// # Errors
///
/// Returns an error if the artifact directory cannot be read.
pub async fn run(app: &AppContext, cmd: ArtifactsCommand) -> Result<ExitCode> {
    let store = app.artifact_store()?;
    match cmd {
        ArtifactsCommand::List => {
            let artifacts = store.list_artifacts().await?;
            app.renderer().render_artifacts(&artifacts, Utc::now())?;
        }
        ArtifactsCommand::Prune => {
            let report = plan_apply::prune_artifacts(&store, Utc::now()).await?;
            app.renderer().render_prune(&report)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
