//! `infrasync run`: plan, confirm, apply.

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;
use crate::application::services::plan_apply;
use crate::infra::manifest::resolve_manifest;

/// Run the plan-then-apply command.
///
/// The apply step is gated by a confirmation prompt unless running
/// non-interactively (`--yes`, `CI`, `INFRASYNC_YES`) or the plan is empty.
/// A declined prompt leaves the plan recorded for a later `infrasync apply`.
///
/// # Errors
///
/// Returns any plan or apply error.
pub async fn run(app: &AppContext) -> Result<ExitCode> {
    let manifest = resolve_manifest(&app.manifest_path)?;
    let backend = app.state_backend()?;
    let store = app.artifact_store()?;
    let reporter = app.reporter();
    let opts = app.run_options();

    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts).await?;
    if !app.is_json() {
        app.renderer().render_plan(&plan)?;
    }

    let approved = !plan.summary().has_changes() || app.approve("Apply this plan?")?;
    let applied = if approved {
        Some(plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts).await?)
    } else {
        None
    };

    app.renderer().render_run(&plan, applied.as_ref())?;
    Ok(ExitCode::SUCCESS)
}
