//! `infrasync state`: inspect state and manage its lock.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::app::AppContext;
use crate::application::ports::StateBackend;
use crate::application::services::state_lock;
use crate::domain::state::StateRef;
use crate::infra::manifest::load_manifest;

/// Arguments for the state command.
#[derive(Args)]
pub struct StateArgs {
    /// State reference `<storage_account>/<container>/<key>`; defaults to the
    /// manifest's backend
    #[arg(long, global = true)]
    pub state: Option<StateRef>,

    #[command(subcommand)]
    pub command: StateCommand,
}

/// State subcommands.
#[derive(Subcommand)]
pub enum StateCommand {
    /// Show the current state document
    Show,
    /// Show who holds the state lock
    LockInfo,
    /// Remove a stuck lock by id
    ForceUnlock {
        /// Lock id shown by `infrasync state lock-info`
        lock_id: String,
    },
}

/// Run the state command.
///
/// # Errors
///
/// Returns an error if the state reference cannot be determined or the
/// backend fails.
pub async fn run(app: &AppContext, args: StateArgs) -> Result<ExitCode> {
    let state = match args.state {
        Some(state) => state,
        None => load_manifest(&app.manifest_path)?.state_ref()?,
    };
    let backend = app.state_backend()?;

    match args.command {
        StateCommand::Show => {
            let doc = backend.read_state(&state).await?;
            app.renderer().render_state(&state, doc.as_ref())?;
        }
        StateCommand::LockInfo => {
            let holder = backend.lock_info(&state).await?;
            app.renderer().render_lock_info(&state, holder.as_ref())?;
        }
        StateCommand::ForceUnlock { lock_id } => {
            let prompt = format!(
                "Force-release lock {lock_id} on {state}? Only do this if the run holding it is gone."
            );
            if !app.approve(&prompt)? {
                app.output.info("Lock left in place.");
                return Ok(ExitCode::SUCCESS);
            }
            let released = state_lock::force_unlock(&backend, &state, &lock_id).await?;
            app.renderer().render_unlocked(&state, &released)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
