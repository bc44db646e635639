//! Application context: unified state passed to every command handler.
//!
//! `AppContext` is built once from the global flags and carries output
//! settings, the loaded configuration and the manifest location. Command
//! handlers build the backends they need from it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::application::ports::ConfigStore;
use crate::application::services::plan_apply::RunOptions;
use crate::domain::config::InfrasyncConfig;
use crate::infra::artifacts::FsArtifactStore;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::YamlConfigStore;
use crate::infra::git::GitCli;
use crate::infra::paths;
use crate::infra::state_backend::FsStateBackend;
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer, TerminalReporter};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Behaviour flags.
pub struct BehaviourFlags {
    /// Skip interactive prompts (also set by `CI` / `INFRASYNC_YES` env vars).
    pub yes: bool,
    /// Path to the deployment manifest.
    pub manifest: PathBuf,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Behaviour options.
    pub behaviour: BehaviourFlags,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Configuration file store.
    pub config_store: YamlConfigStore,
    /// Configuration loaded at startup.
    pub config: InfrasyncConfig,
    /// Deployment manifest location.
    pub manifest_path: PathBuf,
    /// When `true`, skip interactive prompts and use defaults.
    ///
    /// Set when `--yes` / `-y` is passed, or when the `CI` or `INFRASYNC_YES`
    /// environment variables are present.
    pub non_interactive: bool,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("INFRASYNC_YES").is_ok();
        let non_interactive = flags.behaviour.yes || ci_env;

        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        let config_store = YamlConfigStore;
        let config = config_store.load()?;

        Ok(Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config_store,
            config,
            manifest_path: flags.behaviour.manifest.clone(),
            non_interactive,
        })
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    /// Progress reporter; silent in JSON mode so stdout stays parseable.
    #[must_use]
    pub fn reporter(&self) -> TerminalReporter<'_> {
        if self.is_json() {
            TerminalReporter::silent(&self.output)
        } else {
            TerminalReporter::new(&self.output)
        }
    }

    /// State backend rooted at the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the default location cannot be determined.
    pub fn state_backend(&self) -> Result<FsStateBackend> {
        Ok(FsStateBackend::new(paths::backend_root(&self.config)?))
    }

    /// Plan artifact store at the configured directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the default location cannot be determined.
    pub fn artifact_store(&self) -> Result<FsArtifactStore> {
        Ok(FsArtifactStore::new(paths::artifacts_dir(&self.config)?))
    }

    /// Git client for the local mirror repository at `repo`.
    ///
    /// Every git call runs under `mirror.timeout_secs` and never prompts for
    /// credentials.
    #[must_use]
    pub fn git_client(&self, repo: PathBuf) -> GitCli<TokioCommandRunner> {
        let runner = TokioCommandRunner::new(Duration::from_secs(self.config.mirror.timeout_secs))
            .with_env("GIT_TERMINAL_PROMPT", "0");
        GitCli::new(runner, repo)
    }

    /// Lock policy, artifact lifetime and identity for plan/apply.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            lock: self.config.lock_policy(),
            artifact_ttl: self.config.artifact_ttl(),
            who: paths::current_identity(),
        }
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `INFRASYNC_YES`
    /// env), returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }

    /// Gate for destructive actions: approved automatically when
    /// non-interactive, otherwise asks with a "no" default.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails.
    pub fn approve(&self, prompt: &str) -> Result<bool> {
        if self.non_interactive {
            return Ok(true);
        }
        self.confirm(prompt, false)
    }
}
