//! Shared in-memory port implementations for unit tests.
//!
//! Each mock keeps its state behind a `Mutex` so tests can inspect what the
//! service under test did after the call returns.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use infrasync_cli::application::ports::{ArtifactStore, GitClient, ProgressReporter, StateBackend};
use infrasync_cli::domain::error::{AuthenticationError, MirrorError, PlanError, StateError};
use infrasync_cli::domain::manifest::{DeploymentManifest, ResolvedManifest};
use infrasync_cli::domain::mirror::{CommitId, Lease};
use infrasync_cli::domain::plan::PlanArtifact;
use infrasync_cli::domain::state::{LockAttempt, StateRef};
use infrasync_common::{LockInfo, LockOperation, RunRecord, StateDocument};

// ── Manifest helpers ──────────────────────────────────────────────────────────

pub const NETWORK_MANIFEST: &str = "\
environment: dev
backend:
  storage_account: acct001
  container: tfstate
variables:
  location: westeurope
resources:
  vnet:
    kind: virtual_network
    properties:
      location: ${var.location}
      address_space: 10.0.0.0/16
outputs:
  vnet_location: ${var.location}
";

/// Resolve a manifest from YAML with a fixed environment.
pub fn resolved(yaml: &str) -> ResolvedManifest {
    let manifest: DeploymentManifest = serde_yaml::from_str(yaml).expect("valid manifest yaml");
    manifest
        .resolve(&|name| (name == "DB_PASSWORD").then(|| "hunter2".to_string()))
        .expect("manifest resolves")
}

/// The network manifest with the address space changed.
pub fn network_manifest_with(address_space: &str) -> ResolvedManifest {
    resolved(&NETWORK_MANIFEST.replace("10.0.0.0/16", address_space))
}

// ── State backend ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct BackendInner {
    states: HashMap<StateRef, StateDocument>,
    locks: HashMap<StateRef, LockInfo>,
    writes: usize,
}

/// In-memory state backend with optional write failure injection.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<BackendInner>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose `write_state` always fails.
    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn seed(&self, state: &StateRef, doc: StateDocument) {
        self.inner.lock().unwrap().states.insert(state.clone(), doc);
    }

    pub fn state(&self, state: &StateRef) -> Option<StateDocument> {
        self.inner.lock().unwrap().states.get(state).cloned()
    }

    pub fn holder(&self, state: &StateRef) -> Option<LockInfo> {
        self.inner.lock().unwrap().locks.get(state).cloned()
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    /// Take the lock on behalf of another run.
    pub fn hold_lock(&self, state: &StateRef, who: &str) -> LockInfo {
        let info = infrasync_cli::domain::state::new_lock_info(LockOperation::Apply, who);
        self.inner
            .lock()
            .unwrap()
            .locks
            .insert(state.clone(), info.clone());
        info
    }

    pub fn drop_lock(&self, state: &StateRef) {
        self.inner.lock().unwrap().locks.remove(state);
    }

    /// Simulate another writer bumping the serial outside any lock.
    pub fn bump_serial(&self, state: &StateRef) {
        let mut inner = self.inner.lock().unwrap();
        let doc = inner.states.entry(state.clone()).or_default();
        doc.serial += 1;
    }
}

impl StateBackend for MemoryBackend {
    async fn try_lock(&self, state: &StateRef, info: &LockInfo) -> Result<LockAttempt> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(holder) = inner.locks.get(state) {
            return Ok(LockAttempt::Held(holder.clone()));
        }
        inner.locks.insert(state.clone(), info.clone());
        Ok(LockAttempt::Acquired)
    }

    async fn unlock(&self, state: &StateRef, lock_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.locks.get(state) {
            None => Err(StateError::NotLocked {
                state: state.to_string(),
            }
            .into()),
            Some(holder) if holder.id != lock_id => Err(StateError::LockMismatch {
                state: state.to_string(),
                expected: lock_id.to_string(),
                actual: holder.id.clone(),
            }
            .into()),
            Some(_) => {
                inner.locks.remove(state);
                Ok(())
            }
        }
    }

    async fn lock_info(&self, state: &StateRef) -> Result<Option<LockInfo>> {
        Ok(self.holder(state))
    }

    async fn read_state(&self, state: &StateRef) -> Result<Option<StateDocument>> {
        Ok(self.state(state))
    }

    async fn write_state(&self, state: &StateRef, doc: &StateDocument, lock_id: &str) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("storage unavailable");
        }
        let mut inner = self.inner.lock().unwrap();
        let held = inner.locks.get(state).map(|l| l.id.as_str());
        if held != Some(lock_id) {
            return Err(StateError::LockMismatch {
                state: state.to_string(),
                expected: lock_id.to_string(),
                actual: held.unwrap_or("(none)").to_string(),
            }
            .into());
        }
        inner.states.insert(state.clone(), doc.clone());
        inner.writes += 1;
        Ok(())
    }
}

// ── Artifact store ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    artifacts: Mutex<HashMap<String, PlanArtifact>>,
    runs: Mutex<HashMap<StateRef, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.artifacts.lock().unwrap().contains_key(id)
    }

    pub fn run(&self, state: &StateRef) -> Option<RunRecord> {
        self.runs.lock().unwrap().get(state).cloned()
    }

    pub fn insert(&self, artifact: PlanArtifact) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(artifact.id.clone(), artifact);
    }
}

impl ArtifactStore for MemoryStore {
    async fn save_artifact(&self, artifact: &PlanArtifact) -> Result<()> {
        self.insert(artifact.clone());
        Ok(())
    }

    async fn load_artifact(&self, id: &str) -> Result<PlanArtifact> {
        self.artifacts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| PlanError::ArtifactNotFound(id.to_string()).into())
    }

    async fn delete_artifact(&self, id: &str) -> Result<bool> {
        Ok(self.artifacts.lock().unwrap().remove(id).is_some())
    }

    async fn list_artifacts(&self) -> Result<Vec<PlanArtifact>> {
        let mut all: Vec<_> = self.artifacts.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all)
    }

    async fn load_run(&self, state: &StateRef) -> Result<Option<RunRecord>> {
        Ok(self.run(state))
    }

    async fn save_run(&self, state: &StateRef, record: &RunRecord) -> Result<()> {
        self.runs
            .lock()
            .unwrap()
            .insert(state.clone(), record.clone());
        Ok(())
    }
}

// ── Reporter ──────────────────────────────────────────────────────────────────

/// Records every message so tests can assert on user-facing progress.
#[derive(Default)]
pub struct RecordingReporter {
    pub steps: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.steps.lock().unwrap().push(message.to_string());
    }
    fn success(&self, message: &str) {
        self.steps.lock().unwrap().push(message.to_string());
    }
    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

// ── Git ───────────────────────────────────────────────────────────────────────

pub fn commit(fill: char) -> CommitId {
    CommitId::parse(&fill.to_string().repeat(40)).expect("valid commit id")
}

/// What the fake destination does with the next push.
#[derive(Debug, Clone)]
pub enum PushBehaviour {
    Accept,
    /// Another writer pushes `CommitId` just before ours lands.
    RaceWith(CommitId),
    RejectCredentials,
}

/// Fake source/destination pair. Pushes follow `behaviours` in order and
/// default to `Accept` once the queue is empty.
pub struct FakeGit {
    pub source_head: CommitId,
    pub destination: Mutex<Option<CommitId>>,
    pub behaviours: Mutex<VecDeque<PushBehaviour>>,
    pub pushes: Mutex<Vec<Option<Lease>>>,
}

impl FakeGit {
    pub fn new(source_head: CommitId, destination: Option<CommitId>) -> Self {
        Self {
            source_head,
            destination: Mutex::new(destination),
            behaviours: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, behaviour: PushBehaviour) -> Self {
        self.behaviours.lock().unwrap().push_back(behaviour);
        self
    }

    pub fn pushes(&self) -> Vec<Option<Lease>> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn destination_head(&self) -> Option<CommitId> {
        self.destination.lock().unwrap().clone()
    }
}

impl GitClient for FakeGit {
    async fn ensure_repository(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_branch(&self, _remote: &str, _branch: &str) -> Result<CommitId> {
        Ok(self.source_head.clone())
    }

    async fn reset_branch(&self, _branch: &str, _commit: &CommitId) -> Result<()> {
        Ok(())
    }

    async fn remote_head(&self, _remote: &str, _branch: &str) -> Result<Option<CommitId>> {
        Ok(self.destination_head())
    }

    async fn push(&self, remote: &str, branch: &str, lease: Option<&Lease>) -> Result<()> {
        self.pushes.lock().unwrap().push(lease.cloned());
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PushBehaviour::Accept);
        let mut destination = self.destination.lock().unwrap();
        match behaviour {
            PushBehaviour::RejectCredentials => Err(AuthenticationError {
                remote: remote.to_string(),
                detail: "invalid username or password".to_string(),
            }
            .into()),
            PushBehaviour::RaceWith(other) => {
                *destination = Some(other);
                match lease {
                    Some(lease) if lease.expected != *destination => {
                        Err(MirrorError::LeaseConflict {
                            remote: remote.to_string(),
                            branch: branch.to_string(),
                            expected: lease.describe(),
                        }
                        .into())
                    }
                    _ => {
                        *destination = Some(self.source_head.clone());
                        Ok(())
                    }
                }
            }
            PushBehaviour::Accept => {
                if let Some(lease) = lease
                    && lease.expected != *destination
                {
                    return Err(MirrorError::LeaseConflict {
                        remote: remote.to_string(),
                        branch: branch.to_string(),
                        expected: lease.describe(),
                    }
                    .into());
                }
                *destination = Some(self.source_head.clone());
                Ok(())
            }
        }
    }
}
