//! Human-readable terminal renderer.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use infrasync_common::{ChangeAction, LockInfo, StateDocument};
use owo_colors::{OwoColorize as _, Style};

use crate::application::services::plan_apply::{ApplyReport, PruneReport};
use crate::domain::config::InfrasyncConfig;
use crate::domain::mirror::{MirrorSpec, SyncOutcome, redact_url};
use crate::domain::plan::{PlanArtifact, ResourceChange};
use crate::domain::state::StateRef;
use crate::output::OutputContext;

/// Renders domain types as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    /// Render the CLI version information.
    pub fn render_version(&self, version: &str) {
        println!("infrasync {version}");
    }

    /// Render a plan: one block per change, then the summary line.
    pub fn render_plan(&self, plan: &PlanArtifact) {
        println!();
        self.ctx.header(&format!(
            "Plan for {} ({})",
            plan.environment, plan.state_ref
        ));
        println!();

        let summary = plan.summary();
        if summary.has_changes() {
            for change in plan.masked_changes() {
                self.render_change(&change);
            }
            println!(
                "  Plan: {}, {}, {}.",
                format!("{} to create", summary.create).style(self.ctx.styles.create),
                format!("{} to update", summary.update).style(self.ctx.styles.update),
                format!("{} to delete", summary.delete).style(self.ctx.styles.delete),
            );
            if !plan.changed_outputs.is_empty() {
                println!(
                    "  {} {}",
                    "Outputs to change:".style(self.ctx.styles.update),
                    plan.changed_outputs.join(", ")
                );
            }
        } else {
            println!("  No changes. State matches the configuration.");
        }

        let outputs = plan.masked_outputs();
        if !outputs.is_empty() {
            println!();
            println!("  {}", "Outputs:".style(self.ctx.styles.bold));
            print_properties(&outputs, "    ");
        }

        println!();
        self.ctx.kv("Artifact:", &plan.id);
        self.ctx.kv("Fingerprint:", plan.fingerprint.short());
        self.ctx.kv("Base serial:", &plan.base_serial.to_string());
        self.ctx.kv("Expires:", &format_time(plan.expires_at));
        if !self.ctx.quiet {
            println!();
            println!(
                "  Apply with: {}",
                format!("infrasync apply {}", plan.id).style(self.ctx.styles.bold)
            );
        }
    }

    fn render_change(&self, change: &ResourceChange) {
        let (symbol, style) = self.action_style(change.action);
        println!(
            "  {} {} {}",
            symbol.to_string().style(style),
            change.address.style(self.ctx.styles.bold),
            format!("({})", change.kind).style(self.ctx.styles.dim)
        );
        match change.action {
            ChangeAction::Create => {
                if let Some(after) = &change.after {
                    print_properties(after, "      ");
                }
            }
            ChangeAction::Update => {
                let empty = BTreeMap::new();
                let before = change.before.as_ref().unwrap_or(&empty);
                let after = change.after.as_ref().unwrap_or(&empty);
                for name in &change.changed {
                    println!(
                        "      {name} = {} → {}",
                        quoted(before.get(name)),
                        quoted(after.get(name))
                    );
                }
            }
            ChangeAction::Delete => {}
        }
        println!();
    }

    fn action_style(&self, action: ChangeAction) -> (char, Style) {
        let style = match action {
            ChangeAction::Create => self.ctx.styles.create,
            ChangeAction::Update => self.ctx.styles.update,
            ChangeAction::Delete => self.ctx.styles.delete,
        };
        (action.symbol(), style)
    }

    /// Render the result of an apply.
    pub fn render_apply(&self, report: &ApplyReport) {
        self.ctx.success(&format!(
            "Apply complete: {}. State {} is at serial {}.",
            report.summary, report.state, report.serial
        ));
        if !report.outputs.is_empty() && !self.ctx.quiet {
            println!();
            println!("  {}", "Outputs:".style(self.ctx.styles.bold));
            print_properties(&report.outputs, "    ");
        }
    }

    /// The plan was recorded but not applied.
    pub fn render_not_applied(&self, plan: &PlanArtifact) {
        if plan.summary().has_changes() {
            self.ctx.info(&format!(
                "Not applied. Apply later with: infrasync apply {}",
                plan.id
            ));
        }
    }

    /// Render stored plan artifacts.
    pub fn render_artifacts(&self, artifacts: &[PlanArtifact], now: DateTime<Utc>) {
        if artifacts.is_empty() {
            if !self.ctx.quiet {
                println!("No plan artifacts.");
            }
            return;
        }
        println!(
            "  {:<36}  {:<10}  {:<18}  {}",
            "ID".style(self.ctx.styles.dim),
            "ENV".style(self.ctx.styles.dim),
            "CHANGES".style(self.ctx.styles.dim),
            "EXPIRES".style(self.ctx.styles.dim)
        );
        for artifact in artifacts {
            let s = artifact.summary();
            let changes = format!("+{} ~{} -{}", s.create, s.update, s.delete);
            let expires = if artifact.is_expired(now) {
                "expired".style(self.ctx.styles.warning).to_string()
            } else {
                format_time(artifact.expires_at)
            };
            println!(
                "  {:<36}  {:<10}  {:<18}  {expires}",
                artifact.id, artifact.environment, changes
            );
        }
    }

    /// Render the result of `artifacts prune`.
    pub fn render_prune(&self, report: &PruneReport) {
        if report.removed.is_empty() {
            self.ctx.info("No expired plan artifacts.");
        } else {
            self.ctx.success(&format!(
                "Removed {} expired plan artifact(s); {} kept.",
                report.removed.len(),
                report.kept
            ));
        }
    }

    /// Render a state document summary.
    pub fn render_state(&self, state: &StateRef, doc: Option<&StateDocument>) {
        println!();
        self.ctx.header(&format!("State {state}"));
        println!();
        let Some(doc) = doc else {
            println!("  No state has been written yet.");
            println!();
            return;
        };
        self.ctx.kv("Serial:", &doc.serial.to_string());
        self.ctx
            .kv("Lineage:", doc.lineage.as_deref().unwrap_or("(none)"));
        self.ctx.kv("Resources:", &doc.resources.len().to_string());
        println!();
        for (address, resource) in &doc.resources {
            println!(
                "    {address} {}",
                format!("({})", resource.kind).style(self.ctx.styles.dim)
            );
        }
        if !doc.outputs.is_empty() {
            println!();
            println!("  {}", "Outputs:".style(self.ctx.styles.bold));
            for name in doc.outputs.keys() {
                println!("    {name}");
            }
        }
        println!();
    }

    /// Render the current lock holder.
    pub fn render_lock_info(&self, state: &StateRef, holder: Option<&LockInfo>) {
        match holder {
            Some(info) => {
                self.ctx.warn(&format!("State {state} is locked"));
                self.ctx.kv("Lock id:", &info.id);
                self.ctx.kv("Operation:", &info.operation.to_string());
                self.ctx.kv("Holder:", &info.who);
                self.ctx.kv("Since:", &format_time(info.created));
            }
            None => self.ctx.success(&format!("State {state} is not locked")),
        }
    }

    /// Render a forced lock release.
    pub fn render_unlocked(&self, state: &StateRef, released: &LockInfo) {
        self.ctx.success(&format!(
            "Released lock {} on {state} (held by {} for {})",
            released.id, released.who, released.operation
        ));
    }

    /// Render the outcome of a mirror sync.
    pub fn render_sync(&self, spec: &MirrorSpec, outcome: &SyncOutcome) {
        let destination = redact_url(&spec.destination);
        match outcome {
            SyncOutcome::UpToDate { head } => self.ctx.success(&format!(
                "{destination} {} already at {}",
                spec.branch,
                head.short()
            )),
            SyncOutcome::Pushed { from, to, forced } => {
                let from = from.as_ref().map_or("(new branch)", |c| c.short());
                let how = if *forced { " (forced)" } else { "" };
                self.ctx.success(&format!(
                    "{destination} {}: {from} → {}{how}",
                    spec.branch,
                    to.short()
                ));
            }
        }
    }

    /// Render the current infrasync configuration.
    pub fn render_config(&self, config: &InfrasyncConfig, path: &Path) {
        let path_or_default = |p: &Option<std::path::PathBuf>| {
            p.as_ref()
                .map_or_else(|| "(default)".to_string(), |p| p.display().to_string())
        };
        println!();
        println!(
            "  {}",
            format!("Configuration ({})", path.display()).style(self.ctx.styles.header)
        );
        println!();
        println!("  {:<24} {}", "backend.root:", path_or_default(&config.backend.root));
        println!("  {:<24} {}", "lock.timeout_secs:", config.lock.timeout_secs);
        println!(
            "  {:<24} {}",
            "lock.poll_interval_ms:", config.lock.poll_interval_ms
        );
        println!("  {:<24} {}", "artifacts.dir:", path_or_default(&config.artifacts.dir));
        println!("  {:<24} {}", "artifacts.ttl_secs:", config.artifacts.ttl_secs);
        println!(
            "  {:<24} {}",
            "mirror.cache_dir:",
            path_or_default(&config.mirror.cache_dir)
        );
        println!("  {:<24} {}", "mirror.retries:", config.mirror.retries);
        println!("  {:<24} {}", "mirror.timeout_secs:", config.mirror.timeout_secs);
        println!();
        println!("  {}", "Environment:".style(self.ctx.styles.bold));
        for var in ["INFRASYNC_CONFIG", "INFRASYNC_MANIFEST", "NO_COLOR"] {
            println!(
                "    {:<22} {}",
                format!("{var}:"),
                std::env::var(var).unwrap_or_else(|_| "(not set)".to_string())
            );
        }
        println!();
    }

    /// Render a changed setting.
    pub fn render_config_set(&self, key: &str, value: &str) {
        self.ctx.success(&format!("Set {key} = {value}"));
    }
}

fn print_properties(props: &BTreeMap<String, String>, indent: &str) {
    let width = props.keys().map(String::len).max().unwrap_or(0);
    for (name, value) in props {
        println!("{indent}{name:<width$} = {}", quoted(Some(value)));
    }
}

/// `"value"`, or `(none)` for an absent property.
#[must_use]
pub fn quoted(value: Option<&String>) -> String {
    match value {
        Some(v) if v == crate::domain::plan::SENSITIVE_PLACEHOLDER => v.clone(),
        Some(v) => format!("{v:?}"),
        None => "(none)".to_string(),
    }
}

/// Timestamp in the form used across human output.
#[must_use]
pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
