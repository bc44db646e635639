//! Plan artifacts: diffing desired resources against state, applicability
//! checks and applying a plan to a state document.
//!
//! Pure functions only. Persistence of artifacts lives in `crate::infra`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use infrasync_common::{ChangeAction, ResourceInstance, RunRecord, RunStage, StateDocument};
use serde::{Deserialize, Serialize};

use crate::domain::error::{PlanError, StaleReason};
use crate::domain::manifest::{Fingerprint, ResolvedManifest};
use crate::domain::state::StateRef;

/// Artifact format version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Placeholder shown instead of sensitive values.
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive)";

/// One planned change to one resource address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceChange {
    pub address: String,
    pub action: ChangeAction,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<BTreeMap<String, String>>,
    /// Property names whose value differs (updates only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
}

/// Change counts per action, plus outputs whose value changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub outputs: usize,
}

impl PlanSummary {
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.create + self.update + self.delete + self.outputs > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete",
            self.create, self.update, self.delete
        )?;
        if self.outputs > 0 {
            write!(f, ", {} outputs to change", self.outputs)?;
        }
        Ok(())
    }
}

/// Diff current resources against desired resources.
///
/// Deletes come first in reverse address order, then creates and updates in
/// address order. A resource whose kind changed is deleted and re-created.
#[must_use]
pub fn diff(
    current: &BTreeMap<String, ResourceInstance>,
    desired: &BTreeMap<String, ResourceInstance>,
) -> Vec<ResourceChange> {
    let mut deletes = Vec::new();
    let mut upserts = Vec::new();

    for (address, have) in current.iter().rev() {
        let replaced = desired.get(address).is_some_and(|want| want.kind != have.kind);
        if !desired.contains_key(address) || replaced {
            deletes.push(ResourceChange {
                address: address.clone(),
                action: ChangeAction::Delete,
                kind: have.kind.clone(),
                before: Some(have.properties.clone()),
                after: None,
                changed: Vec::new(),
            });
        }
    }

    for (address, want) in desired {
        match current.get(address) {
            Some(have) if have.kind == want.kind => {
                let changed = changed_properties(&have.properties, &want.properties);
                if !changed.is_empty() {
                    upserts.push(ResourceChange {
                        address: address.clone(),
                        action: ChangeAction::Update,
                        kind: want.kind.clone(),
                        before: Some(have.properties.clone()),
                        after: Some(want.properties.clone()),
                        changed,
                    });
                }
            }
            _ => upserts.push(ResourceChange {
                address: address.clone(),
                action: ChangeAction::Create,
                kind: want.kind.clone(),
                before: None,
                after: Some(want.properties.clone()),
                changed: Vec::new(),
            }),
        }
    }

    deletes.extend(upserts);
    deletes
}

/// Names of outputs added, removed or changed between state and manifest.
#[must_use]
pub fn diff_outputs(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Vec<String> {
    changed_properties(current, desired)
}

fn changed_properties(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<String> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}

/// An immutable, single-use plan for one state key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanArtifact {
    pub format: u32,
    pub id: String,
    pub environment: String,
    pub state_ref: StateRef,
    pub fingerprint: Fingerprint,
    /// Serial of the state the plan was computed against.
    pub base_serial: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_lineage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub changes: Vec<ResourceChange>,
    /// Outputs to record on apply.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Output names whose recorded value changes on apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_outputs: Vec<String>,
    #[serde(default)]
    pub sensitive: BTreeSet<String>,
}

impl PlanArtifact {
    /// Plan `manifest` against `state`.
    #[must_use]
    pub fn new(
        id: String,
        manifest: &ResolvedManifest,
        state: &StateDocument,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            format: ARTIFACT_FORMAT_VERSION,
            id,
            environment: manifest.environment.clone(),
            state_ref: manifest.state_ref.clone(),
            fingerprint: manifest.fingerprint.clone(),
            base_serial: state.serial,
            base_lineage: state.lineage.clone(),
            created_at: now,
            expires_at: now + ttl,
            changes: diff(&state.resources, &manifest.resources),
            outputs: manifest.outputs.clone(),
            changed_outputs: diff_outputs(&state.outputs, &manifest.outputs),
            sensitive: manifest.sensitive.clone(),
        }
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            outputs: self.changed_outputs.len(),
            ..PlanSummary::default()
        };
        for change in &self.changes {
            match change.action {
                ChangeAction::Create => summary.create += 1,
                ChangeAction::Update => summary.update += 1,
                ChangeAction::Delete => summary.delete += 1,
            }
        }
        summary
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Checks that need no lock: same state target, same configuration, not
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StaleArtifact`] naming the first failed check.
    pub fn check_manifest(&self, manifest: &ResolvedManifest, now: DateTime<Utc>) -> Result<()> {
        if self.state_ref != manifest.state_ref {
            return Err(PlanError::stale(
                &self.id,
                StaleReason::DifferentState {
                    planned: self.state_ref.to_string(),
                    current: manifest.state_ref.to_string(),
                },
            )
            .into());
        }
        if self.fingerprint != manifest.fingerprint {
            return Err(PlanError::stale(
                &self.id,
                StaleReason::FingerprintMismatch {
                    planned: self.fingerprint.short().to_string(),
                    current: manifest.fingerprint.short().to_string(),
                },
            )
            .into());
        }
        if self.is_expired(now) {
            return Err(PlanError::stale(
                &self.id,
                StaleReason::Expired {
                    expired_at: self.expires_at,
                },
            )
            .into());
        }
        Ok(())
    }

    /// The artifact must be the plan the run record is waiting on.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StaleArtifact`] when superseded or consumed.
    pub fn check_latest(&self, record: Option<&RunRecord>) -> Result<()> {
        let reason = match record {
            Some(rec) if rec.awaits(&self.id) => return Ok(()),
            Some(rec) if rec.artifact_id == self.id => StaleReason::AlreadyConsumed,
            Some(rec) => StaleReason::Superseded {
                latest: rec.artifact_id.clone(),
            },
            None => StaleReason::NotRecorded,
        };
        Err(PlanError::stale(&self.id, reason).into())
    }

    /// The state must not have moved since planning.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::StaleArtifact`] on serial or lineage drift.
    pub fn check_base(&self, state: &StateDocument) -> Result<()> {
        if state.serial != self.base_serial {
            return Err(PlanError::stale(
                &self.id,
                StaleReason::StateMoved {
                    planned: self.base_serial,
                    current: state.serial,
                },
            )
            .into());
        }
        if self.base_lineage.is_some() && state.lineage != self.base_lineage {
            return Err(PlanError::stale(&self.id, StaleReason::LineageChanged).into());
        }
        Ok(())
    }

    /// Apply the planned changes to `state`, producing its successor.
    #[must_use]
    pub fn apply_to(&self, state: &StateDocument) -> StateDocument {
        let mut resources = state.resources.clone();
        for change in &self.changes {
            match change.action {
                ChangeAction::Delete => {
                    resources.remove(&change.address);
                }
                ChangeAction::Create | ChangeAction::Update => {
                    resources.insert(
                        change.address.clone(),
                        ResourceInstance {
                            kind: change.kind.clone(),
                            properties: change.after.clone().unwrap_or_default(),
                        },
                    );
                }
            }
        }
        let mut next = state.successor(resources, self.outputs.clone(), || {
            uuid::Uuid::new_v4().to_string()
        });
        next.sensitive.clone_from(&self.sensitive);
        next
    }

    /// Whether `address.property` must be masked when displayed.
    #[must_use]
    pub fn is_sensitive(&self, address: &str, property: &str) -> bool {
        self.sensitive.contains(&format!("{address}.{property}"))
    }

    /// Changes with sensitive property values replaced by
    /// [`SENSITIVE_PLACEHOLDER`].
    #[must_use]
    pub fn masked_changes(&self) -> Vec<ResourceChange> {
        let mask = |address: &str, props: &Option<BTreeMap<String, String>>| {
            props.as_ref().map(|props| {
                props
                    .iter()
                    .map(|(name, value)| {
                        let shown = if self.is_sensitive(address, name) {
                            SENSITIVE_PLACEHOLDER.to_string()
                        } else {
                            value.clone()
                        };
                        (name.clone(), shown)
                    })
                    .collect()
            })
        };
        self.changes
            .iter()
            .map(|change| ResourceChange {
                before: mask(&change.address, &change.before),
                after: mask(&change.address, &change.after),
                ..change.clone()
            })
            .collect()
    }

    /// Outputs with sensitive values masked.
    #[must_use]
    pub fn masked_outputs(&self) -> BTreeMap<String, String> {
        self.outputs
            .iter()
            .map(|(name, value)| {
                let shown = if self.is_sensitive("output", name) {
                    SENSITIVE_PLACEHOLDER.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), shown)
            })
            .collect()
    }
}

/// A copy of `doc` safe to display: values listed in `doc.sensitive` are
/// replaced by [`SENSITIVE_PLACEHOLDER`].
#[must_use]
pub fn masked_state(doc: &StateDocument) -> StateDocument {
    let mut masked = doc.clone();
    for (address, resource) in &mut masked.resources {
        for (name, value) in &mut resource.properties {
            if doc.sensitive.contains(&format!("{address}.{name}")) {
                *value = SENSITIVE_PLACEHOLDER.to_string();
            }
        }
    }
    for (name, value) in &mut masked.outputs {
        if doc.sensitive.contains(&format!("output.{name}")) {
            *value = SENSITIVE_PLACEHOLDER.to_string();
        }
    }
    masked
}

/// Artifact ids are UUIDs; anything else is refused before touching disk.
///
/// # Errors
///
/// Returns [`PlanError::InvalidArtifactId`] if `id` is not a UUID.
pub fn validate_artifact_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id).map_err(|_| PlanError::InvalidArtifactId(id.to_string()))?;
    Ok(())
}

/// Explain why an artifact that no longer exists cannot be applied.
///
/// Returns the stale error when the run record shows it was consumed.
#[must_use]
pub fn missing_artifact_error(id: &str, record: Option<&RunRecord>) -> PlanError {
    match record {
        Some(rec) if rec.artifact_id == id && rec.stage != RunStage::Planned => {
            PlanError::stale(id, StaleReason::AlreadyConsumed)
        }
        Some(rec) if rec.artifact_id != id => PlanError::stale(
            id,
            StaleReason::Superseded {
                latest: rec.artifact_id.clone(),
            },
        ),
        _ => PlanError::ArtifactNotFound(id.to_string()),
    }
}
