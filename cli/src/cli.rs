//! CLI argument parsing with clap derive

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand};

use crate::app::{AppContext, AppFlags, BehaviourFlags, OutputFlags};
use crate::commands;

/// Lock-guarded infrastructure plan/apply and repository mirroring
#[derive(Parser)]
#[command(
    name = "infrasync",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Skip confirmation prompts
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Deployment manifest
    #[arg(
        long,
        global = true,
        env = "INFRASYNC_MANIFEST",
        default_value = "deployment.yaml"
    )]
    pub manifest: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compute a plan and record it as the pending plan for its state
    Plan(commands::plan::PlanArgs),

    /// Apply a recorded plan artifact
    Apply(commands::apply::ApplyArgs),

    /// Plan, confirm and apply in one step
    Run,

    /// Show a recorded plan artifact
    Show(commands::show::ShowArgs),

    /// Inspect state and its lock
    State(commands::state::StateArgs),

    /// Manage stored plan artifacts
    #[command(subcommand)]
    Artifacts(commands::artifacts::ArtifactsCommand),

    /// Mirror branches between Git remotes
    #[command(subcommand)]
    Mirror(commands::mirror::MirrorCommand),

    /// Manage infrasync configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),

    /// Show version information
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or the command
    /// fails.
    pub async fn run(self) -> Result<ExitCode> {
        let Cli {
            json,
            quiet,
            no_color,
            yes,
            verbose: _,
            manifest,
            command,
        } = self;

        let app = AppContext::new(&AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            behaviour: BehaviourFlags { yes, manifest },
        })?;

        match command {
            Command::Plan(args) => commands::plan::run(&app, &args).await,
            Command::Apply(args) => commands::apply::run(&app, &args).await,
            Command::Run => commands::run::run(&app).await,
            Command::Show(args) => commands::show::run(&app, &args).await,
            Command::State(args) => commands::state::run(&app, args).await,
            Command::Artifacts(cmd) => commands::artifacts::run(&app, cmd).await,
            Command::Mirror(cmd) => commands::mirror::run(&app, cmd).await,
            Command::Config(cmd) => commands::config::run(&app, cmd),
            Command::Version => commands::version::run(&app),
        }
    }
}
