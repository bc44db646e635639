//! Output formatting module

pub mod human;
pub mod json;
pub mod reporter;
pub mod styles;

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use console::Term;
use infrasync_common::{LockInfo, StateDocument};
use owo_colors::OwoColorize as _;

pub use human::HumanRenderer;
pub use json::JsonRenderer;
pub use reporter::TerminalReporter;
pub use styles::Styles;

use crate::application::services::plan_apply::{ApplyReport, PruneReport};
use crate::domain::config::InfrasyncConfig;
use crate::domain::mirror::{MirrorSpec, SyncOutcome};
use crate::domain::plan::PlanArtifact;
use crate::domain::state::StateRef;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Check if progress indicators should be shown.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        self.is_tty && !self.quiet
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an info message prefixed with `ℹ`. Suppressed when `quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "ℹ".style(self.styles.info));
        }
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {:<14} {value}", key.style(self.styles.dim));
        }
    }
}

/// Renderer for the active output mode.
pub enum Renderer<'a> {
    Human(HumanRenderer<'a>),
    Json(JsonRenderer),
}

impl Renderer<'_> {
    /// Render a freshly recorded plan or a stored one (`show`).
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_plan(&self, plan: &PlanArtifact) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_plan(plan);
                Ok(())
            }
            Self::Json(r) => r.render_plan(plan),
        }
    }

    /// Render the result of an apply.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_apply(&self, report: &ApplyReport) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_apply(report);
                Ok(())
            }
            Self::Json(r) => r.render_apply(report),
        }
    }

    /// Render a plan-then-apply run. `applied` is `None` when the apply was
    /// declined or there was nothing to apply.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_run(&self, plan: &PlanArtifact, applied: Option<&ApplyReport>) -> Result<()> {
        match self {
            Self::Human(r) => {
                if let Some(report) = applied {
                    r.render_apply(report);
                } else {
                    r.render_not_applied(plan);
                }
                Ok(())
            }
            Self::Json(r) => r.render_run(plan, applied),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_artifacts(&self, artifacts: &[PlanArtifact], now: DateTime<Utc>) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_artifacts(artifacts, now);
                Ok(())
            }
            Self::Json(r) => r.render_artifacts(artifacts, now),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_prune(&self, report: &PruneReport) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_prune(report);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::print(report),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_state(&self, state: &StateRef, doc: Option<&StateDocument>) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_state(state, doc);
                Ok(())
            }
            Self::Json(r) => r.render_state(state, doc),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_lock_info(&self, state: &StateRef, holder: Option<&LockInfo>) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_lock_info(state, holder);
                Ok(())
            }
            Self::Json(r) => r.render_lock_info(state, holder),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_unlocked(&self, state: &StateRef, released: &LockInfo) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_unlocked(state, released);
                Ok(())
            }
            Self::Json(r) => r.render_unlocked(state, released),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_sync(&self, spec: &MirrorSpec, outcome: &SyncOutcome) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_sync(spec, outcome);
                Ok(())
            }
            Self::Json(r) => r.render_sync(spec, outcome),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_config(&self, config: &InfrasyncConfig, path: &Path) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_config(config, path);
                Ok(())
            }
            Self::Json(r) => r.render_config(config, path),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_config_set(&self, key: &str, value: &str) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_config_set(key, value);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::print(&serde_json::json!({ "key": key, "value": value })),
        }
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_version(&self, version: &str) -> Result<()> {
        match self {
            Self::Human(r) => {
                r.render_version(version);
                Ok(())
            }
            Self::Json(_) => JsonRenderer::print(&serde_json::json!({ "version": version })),
        }
    }
}
