//! `infrasync plan`: compute and record a plan for the manifest.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::plan_apply;
use crate::domain::error::exit_code;
use crate::infra::manifest::resolve_manifest;

/// Arguments for the plan command.
#[derive(Args)]
pub struct PlanArgs {
    /// Exit 2 when the plan contains changes, 0 when it does not
    #[arg(long)]
    pub detailed_exitcode: bool,
}

/// Run the plan command.
///
/// # Errors
///
/// Returns an error if the manifest is invalid, the state is locked, or the
/// artifact cannot be stored.
pub async fn run(app: &AppContext, args: &PlanArgs) -> Result<ExitCode> {
    let manifest = resolve_manifest(&app.manifest_path)?;
    let backend = app.state_backend()?;
    let store = app.artifact_store()?;
    let reporter = app.reporter();

    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &app.run_options()).await?;
    app.renderer().render_plan(&plan)?;

    if args.detailed_exitcode && plan.summary().has_changes() {
        return Ok(ExitCode::from(exit_code::CHANGES_PRESENT));
    }
    Ok(ExitCode::SUCCESS)
}
