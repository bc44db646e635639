use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format version written into every state document.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// A single managed resource as recorded in state or declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceInstance {
    /// Resource kind, e.g. `resource_group` or `virtual_network`.
    pub kind: String,
    /// Fully resolved properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// The remote state file for one environment key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateDocument {
    pub version: u32,
    /// Incremented on every write.
    pub serial: u64,
    /// Fixed at the first write; `None` for a state that was never written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<String>,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceInstance>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// `address.property` and `output.NAME` entries never to be displayed.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sensitive: BTreeSet<String>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            sensitive: BTreeSet::new(),
        }
    }
}

impl StateDocument {
    /// Returns `true` when no resources are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Build the next revision of this document.
    ///
    /// The serial is bumped by one. An existing lineage is kept; `new_lineage`
    /// is only used when this document has never been written.
    #[must_use]
    pub fn successor(
        &self,
        resources: BTreeMap<String, ResourceInstance>,
        outputs: BTreeMap<String, String>,
        new_lineage: impl FnOnce() -> String,
    ) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: self.serial + 1,
            lineage: Some(self.lineage.clone().unwrap_or_else(new_lineage)),
            resources,
            outputs,
            sensitive: BTreeSet::new(),
        }
    }
}

/// Operation that holds a state lock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockOperation {
    Plan,
    Apply,
}

impl fmt::Display for LockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan => f.write_str("plan"),
            Self::Apply => f.write_str("apply"),
        }
    }
}

/// Contents of a state lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock id, required to write state or force-unlock.
    pub id: String,
    pub operation: LockOperation,
    /// `user@host` of the run holding the lock.
    pub who: String,
    pub created: DateTime<Utc>,
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {} since {} (lock id {})",
            self.operation,
            self.who,
            self.created.format("%Y-%m-%d %H:%M:%S UTC"),
            self.id
        )
    }
}

/// Kind of change a plan makes to one resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    /// Single-character marker used in plan listings.
    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            Self::Create => '+',
            Self::Update => '~',
            Self::Delete => '-',
        }
    }
}

/// Stage of a plan/apply run for one state key.
///
/// ```text
/// Planned ──▶ Applying ──▶ Applied
///    │            │
///    └────────────┴──────▶ Failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Planned,
    Applying,
    Applied,
    Failed,
}

impl RunStage {
    /// Whether a run in this stage may move to `next`.
    #[must_use]
    pub fn can_advance_to(self, next: RunStage) -> bool {
        matches!(
            (self, next),
            (Self::Planned, Self::Applying | Self::Failed) | (Self::Applying, Self::Applied | Self::Failed)
        )
    }

    /// A terminal run no longer owns a usable artifact.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Planned => "plan ready for apply",
            Self::Applying => "apply in progress",
            Self::Applied => "applied",
            Self::Failed => "apply failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Invalid run stage transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot move run from '{from}' to '{to}'")]
pub struct StageTransitionError {
    pub from: RunStage,
    pub to: RunStage,
}

/// The most recent plan recorded for a state key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    /// Display form of the state reference, `account/container/key`.
    pub state_key: String,
    pub artifact_id: String,
    pub fingerprint: String,
    pub stage: RunStage,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Start a new run in the `Planned` stage.
    #[must_use]
    pub fn planned(state_key: String, artifact_id: String, fingerprint: String) -> Self {
        Self {
            state_key,
            artifact_id,
            fingerprint,
            stage: RunStage::Planned,
            updated_at: Utc::now(),
        }
    }

    /// Move the run to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`StageTransitionError`] for a transition the state machine
    /// forbids; the record is left unchanged.
    pub fn advance(&mut self, next: RunStage) -> Result<(), StageTransitionError> {
        if !self.stage.can_advance_to(next) {
            return Err(StageTransitionError {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether `artifact_id` is the plan this run is waiting to apply.
    #[must_use]
    pub fn awaits(&self, artifact_id: &str) -> bool {
        self.stage == RunStage::Planned && self.artifact_id == artifact_id
    }
}
