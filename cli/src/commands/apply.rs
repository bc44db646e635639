//! `infrasync apply`: apply a recorded plan exactly once.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::plan_apply;
use crate::infra::manifest::resolve_manifest;

/// Arguments for the apply command.
#[derive(Args)]
pub struct ApplyArgs {
    /// Plan artifact id printed by `infrasync plan`
    pub artifact_id: String,
}

/// Run the apply command.
///
/// # Errors
///
/// Returns `StaleArtifact` when the plan no longer matches the manifest or
/// state, and lock errors when another run holds the state.
pub async fn run(app: &AppContext, args: &ApplyArgs) -> Result<ExitCode> {
    let manifest = resolve_manifest(&app.manifest_path)?;
    let backend = app.state_backend()?;
    let store = app.artifact_store()?;
    let reporter = app.reporter();

    let report = plan_apply::apply(
        &backend,
        &store,
        &reporter,
        &manifest,
        &args.artifact_id,
        &app.run_options(),
    )
    .await?;
    app.renderer().render_apply(&report)?;
    Ok(ExitCode::SUCCESS)
}
