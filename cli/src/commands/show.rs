//! `infrasync show`: render a stored plan artifact.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::ArtifactStore;

/// Arguments for the show command.
#[derive(Args)]
pub struct ShowArgs {
    /// Plan artifact id
    pub artifact_id: String,
}

/// Run the show command.
///
/// # Errors
///
/// Returns an error if the artifact does not exist or is unreadable.
pub async fn run(app: &AppContext, args: &ShowArgs) -> Result<ExitCode> {
    let store = app.artifact_store()?;
    let plan = store.load_artifact(&args.artifact_id).await?;
    app.renderer().render_plan(&plan)?;
    Ok(ExitCode::SUCCESS)
}
