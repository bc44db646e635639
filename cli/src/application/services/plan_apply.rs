//! Application service: plan/apply orchestration.
//!
//! A plan is computed and recorded under the state lock. Apply consumes that
//! exact plan once: it must match the current configuration fingerprint, be
//! the run record's pending plan, and see the same state serial it was
//! planned against.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use infrasync_common::{LockOperation, RunRecord, RunStage, StateDocument};
use serde::Serialize;

use crate::application::ports::{ArtifactStore, ProgressReporter, StateBackend};
use crate::application::services::state_lock::{LockHandle, with_state_lock};
use crate::domain::manifest::ResolvedManifest;
use crate::domain::plan::{
    PlanArtifact, PlanSummary, missing_artifact_error, validate_artifact_id,
};
use crate::domain::state::LockPolicy;

/// Settings shared by plan and apply.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub lock: LockPolicy,
    pub artifact_ttl: chrono::Duration,
    /// `user@host` recorded in lock files.
    pub who: String,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub artifact_id: String,
    pub state: String,
    pub summary: PlanSummary,
    pub serial: u64,
    /// Recorded outputs, sensitive values masked.
    pub outputs: std::collections::BTreeMap<String, String>,
}

/// Result of pruning expired artifacts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub kept: usize,
}

/// Plan `manifest` against the current state and record the artifact as the
/// pending plan for its state key, superseding any earlier pending plan.
///
/// # Errors
///
/// Returns lock errors (`LockContention`/`LockTimeout`) or storage errors.
pub async fn plan(
    backend: &impl StateBackend,
    store: &impl ArtifactStore,
    reporter: &impl ProgressReporter,
    manifest: &ResolvedManifest,
    opts: &RunOptions,
) -> Result<PlanArtifact> {
    let state_ref = &manifest.state_ref;
    with_state_lock(
        backend,
        reporter,
        state_ref,
        LockOperation::Plan,
        &opts.who,
        &opts.lock,
        |_lock| async move {
            reporter.step(&format!("Reading state {state_ref}"));
            let current = backend.read_state(state_ref).await?.unwrap_or_default();

            let artifact = PlanArtifact::new(
                uuid::Uuid::new_v4().to_string(),
                manifest,
                &current,
                Utc::now(),
                opts.artifact_ttl,
            );
            store
                .save_artifact(&artifact)
                .await
                .context("saving plan artifact")?;

            if let Some(previous) = store.load_run(state_ref).await? {
                supersede(store, reporter, &previous).await?;
            }
            let record = RunRecord::planned(
                state_ref.to_string(),
                artifact.id.clone(),
                artifact.fingerprint.to_string(),
            );
            store.save_run(state_ref, &record).await?;

            tracing::info!(
                artifact = %artifact.id,
                state = %state_ref,
                fingerprint = %artifact.fingerprint.short(),
                base_serial = artifact.base_serial,
                summary = %artifact.summary(),
                "plan recorded"
            );
            Ok(artifact)
        },
    )
    .await
}

async fn supersede(
    store: &impl ArtifactStore,
    reporter: &impl ProgressReporter,
    previous: &RunRecord,
) -> Result<()> {
    match previous.stage {
        RunStage::Planned => {
            if store.delete_artifact(&previous.artifact_id).await? {
                reporter.warn(&format!(
                    "Discarded unapplied plan {}",
                    previous.artifact_id
                ));
            }
        }
        RunStage::Applying => {
            reporter.warn(&format!(
                "Previous apply of {} did not finish; planning against current state",
                previous.artifact_id
            ));
            store.delete_artifact(&previous.artifact_id).await?;
        }
        RunStage::Applied | RunStage::Failed => {}
    }
    Ok(())
}

/// Apply the artifact `artifact_id` under the configuration `manifest`.
///
/// # Errors
///
/// - `PlanError::StaleArtifact` if the fingerprint differs, the plan was
///   superseded, consumed, expired, or the state moved since planning.
/// - `StateError::LockContention` / `StateError::LockTimeout` if the state is
///   held by another run.
pub async fn apply(
    backend: &impl StateBackend,
    store: &impl ArtifactStore,
    reporter: &impl ProgressReporter,
    manifest: &ResolvedManifest,
    artifact_id: &str,
    opts: &RunOptions,
) -> Result<ApplyReport> {
    validate_artifact_id(artifact_id)?;
    let state_ref = &manifest.state_ref;

    let artifact = match store.load_artifact(artifact_id).await {
        Ok(artifact) => artifact,
        Err(e) if is_not_found(&e) => {
            let record = store.load_run(state_ref).await?;
            return Err(missing_artifact_error(artifact_id, record.as_ref()).into());
        }
        Err(e) => return Err(e),
    };
    artifact.check_manifest(manifest, Utc::now())?;

    with_state_lock(
        backend,
        reporter,
        state_ref,
        LockOperation::Apply,
        &opts.who,
        &opts.lock,
        |lock| async move {
            let record = store.load_run(state_ref).await?;
            artifact.check_latest(record.as_ref())?;
            let Some(mut record) = record else {
                return Err(missing_artifact_error(&artifact.id, None).into());
            };
            let record = &mut record;

            let current = backend.read_state(state_ref).await?.unwrap_or_default();
            if let Err(e) = artifact.check_base(&current) {
                finish(store, state_ref, record, RunStage::Failed, &artifact.id).await;
                return Err(e);
            }

            record.advance(RunStage::Applying)?;
            store.save_run(state_ref, record).await?;

            let written = if artifact.changes.is_empty() && current.outputs == artifact.outputs {
                reporter.step("No changes to apply");
                Ok(current.clone())
            } else {
                write_next_state(backend, reporter, &artifact, &current, &lock).await
            };
            match written {
                Ok(next) => {
                    finish(store, state_ref, record, RunStage::Applied, &artifact.id).await;
                    tracing::info!(
                        artifact = %artifact.id,
                        state = %state_ref,
                        serial = next.serial,
                        "apply complete"
                    );
                    Ok(ApplyReport {
                        artifact_id: artifact.id.clone(),
                        state: state_ref.to_string(),
                        summary: artifact.summary(),
                        serial: next.serial,
                        outputs: artifact.masked_outputs(),
                    })
                }
                Err(e) => {
                    finish(store, state_ref, record, RunStage::Failed, &artifact.id).await;
                    Err(e)
                }
            }
        },
    )
    .await
}

async fn write_next_state(
    backend: &impl StateBackend,
    reporter: &impl ProgressReporter,
    artifact: &PlanArtifact,
    current: &StateDocument,
    lock: &LockHandle,
) -> Result<StateDocument> {
    let next = artifact.apply_to(current);
    for change in &artifact.changes {
        reporter.step(&format!(
            "{} {} ({})",
            change.action.symbol(),
            change.address,
            change.kind
        ));
    }
    backend
        .write_state(&lock.state, &next, lock.id())
        .await
        .context("writing new state")?;
    Ok(next)
}

/// Move the run to a terminal stage and consume the artifact.
///
/// Failures here are logged, not returned: the outcome of the apply itself
/// has already been decided.
async fn finish(
    store: &impl ArtifactStore,
    state_ref: &crate::domain::state::StateRef,
    record: &mut RunRecord,
    stage: RunStage,
    artifact_id: &str,
) {
    if let Err(e) = record.advance(stage) {
        tracing::warn!(error = %e, "run record transition refused");
    }
    if let Err(e) = store.save_run(state_ref, record).await {
        tracing::warn!(error = %e, "failed to save run record");
    }
    if let Err(e) = store.delete_artifact(artifact_id).await {
        tracing::warn!(error = %e, artifact = artifact_id, "failed to delete consumed artifact");
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<crate::domain::error::PlanError>(),
        Some(crate::domain::error::PlanError::ArtifactNotFound(_))
    )
}

/// Delete every artifact that expired before `now`.
///
/// # Errors
///
/// Returns an error if the artifact directory cannot be listed.
pub async fn prune_artifacts(
    store: &impl ArtifactStore,
    now: DateTime<Utc>,
) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    for artifact in store.list_artifacts().await? {
        if artifact.is_expired(now) {
            if store.delete_artifact(&artifact.id).await? {
                tracing::info!(artifact = %artifact.id, "pruned expired artifact");
                report.removed.push(artifact.id);
            }
        } else {
            report.kept += 1;
        }
    }
    Ok(report)
}
