//! JSON output helpers.
//!
//! Every `--json` code path prints exactly one pretty-printed JSON document
//! to stdout. Failures use the error object from [`format_error`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use infrasync_common::{LockInfo, StateDocument};
use serde::Serialize;

use crate::application::services::plan_apply::ApplyReport;
use crate::domain::config::InfrasyncConfig;
use crate::domain::mirror::{MirrorSpec, SyncOutcome, redact_url};
use crate::domain::plan::{PlanArtifact, PlanSummary, ResourceChange, masked_state};
use crate::domain::state::StateRef;

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Plan as shown to users: sensitive values are masked.
#[derive(Debug, Serialize)]
pub struct PlanView<'a> {
    pub id: &'a str,
    pub environment: &'a str,
    pub state: String,
    pub fingerprint: &'a str,
    pub base_serial: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub summary: PlanSummary,
    pub changes: Vec<ResourceChange>,
    pub outputs: BTreeMap<String, String>,
    pub changed_outputs: &'a [String],
}

impl<'a> From<&'a PlanArtifact> for PlanView<'a> {
    fn from(plan: &'a PlanArtifact) -> Self {
        Self {
            id: &plan.id,
            environment: &plan.environment,
            state: plan.state_ref.to_string(),
            fingerprint: plan.fingerprint.as_str(),
            base_serial: plan.base_serial,
            created_at: plan.created_at,
            expires_at: plan.expires_at,
            summary: plan.summary(),
            changes: plan.masked_changes(),
            outputs: plan.masked_outputs(),
            changed_outputs: &plan.changed_outputs,
        }
    }
}

#[derive(Serialize)]
struct ArtifactEntry<'a> {
    id: &'a str,
    environment: &'a str,
    state: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    expired: bool,
    summary: PlanSummary,
}

/// Machine-readable renderer.
pub struct JsonRenderer;

impl JsonRenderer {
    /// Print any serializable value as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn print<T: Serialize + ?Sized>(value: &T) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("JSON serialization failed")?
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_plan(&self, plan: &PlanArtifact) -> Result<()> {
        Self::print(&PlanView::from(plan))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_apply(&self, report: &ApplyReport) -> Result<()> {
        Self::print(report)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_run(&self, plan: &PlanArtifact, applied: Option<&ApplyReport>) -> Result<()> {
        Self::print(&serde_json::json!({
            "plan": PlanView::from(plan),
            "applied": applied.is_some(),
            "apply": applied,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_artifacts(&self, artifacts: &[PlanArtifact], now: DateTime<Utc>) -> Result<()> {
        let entries: Vec<ArtifactEntry<'_>> = artifacts
            .iter()
            .map(|a| ArtifactEntry {
                id: &a.id,
                environment: &a.environment,
                state: a.state_ref.to_string(),
                created_at: a.created_at,
                expires_at: a.expires_at,
                expired: a.is_expired(now),
                summary: a.summary(),
            })
            .collect();
        Self::print(&serde_json::json!({ "artifacts": entries }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_state(&self, state: &StateRef, doc: Option<&StateDocument>) -> Result<()> {
        Self::print(&serde_json::json!({
            "state": state.to_string(),
            "exists": doc.is_some(),
            "document": doc.map(masked_state),
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_lock_info(&self, state: &StateRef, holder: Option<&LockInfo>) -> Result<()> {
        Self::print(&serde_json::json!({
            "state": state.to_string(),
            "locked": holder.is_some(),
            "lock": holder,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_unlocked(&self, state: &StateRef, released: &LockInfo) -> Result<()> {
        Self::print(&serde_json::json!({
            "state": state.to_string(),
            "released": released,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_sync(&self, spec: &MirrorSpec, outcome: &SyncOutcome) -> Result<()> {
        Self::print(&serde_json::json!({
            "source": redact_url(&spec.source),
            "destination": redact_url(&spec.destination),
            "branch": spec.branch,
            "outcome": outcome,
        }))
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render_config(&self, config: &InfrasyncConfig, path: &Path) -> Result<()> {
        Self::print(&serde_json::json!({
            "path": path.display().to_string(),
            "config": config,
        }))
    }
}
