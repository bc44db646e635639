//! Plan/apply orchestration against in-memory ports.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use infrasync_cli::application::services::plan_apply::{self, RunOptions};
use infrasync_cli::domain::error::{PlanError, StaleReason, StateError, classify, exit_code};
use infrasync_cli::domain::plan::SENSITIVE_PLACEHOLDER;
use infrasync_cli::domain::state::LockPolicy;
use infrasync_common::RunStage;

use crate::mocks::{
    MemoryBackend, MemoryStore, NETWORK_MANIFEST, RecordingReporter, network_manifest_with,
    resolved,
};

fn opts() -> RunOptions {
    RunOptions {
        lock: LockPolicy::no_wait(),
        artifact_ttl: chrono::Duration::hours(1),
        who: "tester@ci".to_string(),
    }
}

fn stale_reason(err: &anyhow::Error) -> &StaleReason {
    match err.downcast_ref::<PlanError>() {
        Some(PlanError::StaleArtifact { reason, .. }) => reason,
        other => panic!("expected stale artifact error, got {other:?} ({err:#})"),
    }
}

#[tokio::test]
async fn test_plan_records_pending_artifact() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);

    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();

    assert_eq!(plan.summary().create, 1);
    assert_eq!(plan.base_serial, 0);
    assert!(store.contains(&plan.id));
    let run = store.run(&manifest.state_ref).unwrap();
    assert_eq!(run.artifact_id, plan.id);
    assert_eq!(run.stage, RunStage::Planned);
    assert!(backend.holder(&manifest.state_ref).is_none(), "lock released");
    assert_eq!(backend.writes(), 0, "planning never writes state");
}

#[tokio::test]
async fn test_apply_writes_next_state_and_consumes_artifact() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();

    let report = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap();

    assert_eq!(report.serial, 1);
    assert_eq!(report.summary.create, 1);
    let state = backend.state(&manifest.state_ref).unwrap();
    assert_eq!(state.serial, 1);
    assert!(state.lineage.is_some());
    assert_eq!(state.resources["vnet"].properties["address_space"], "10.0.0.0/16");
    assert_eq!(state.outputs["vnet_location"], "westeurope");
    assert!(!store.contains(&plan.id));
    assert_eq!(store.run(&manifest.state_ref).unwrap().stage, RunStage::Applied);
    assert!(backend.holder(&manifest.state_ref).is_none());
}

#[tokio::test]
async fn test_second_apply_of_same_plan_is_stale() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap();

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap_err();

    assert_eq!(stale_reason(&err), &StaleReason::AlreadyConsumed);
    assert_eq!(classify(&err).0, exit_code::STALE_ARTIFACT);
    assert_eq!(backend.writes(), 1);
}

#[tokio::test]
async fn test_apply_refuses_plan_after_configuration_changed() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let c1 = resolved(NETWORK_MANIFEST);
    let c2 = network_manifest_with("10.1.0.0/16");

    let plan_a = plan_apply::plan(&backend, &store, &reporter, &c1, &opts())
        .await
        .unwrap();
    let err = plan_apply::apply(&backend, &store, &reporter, &c2, &plan_a.id, &opts())
        .await
        .unwrap_err();

    assert!(matches!(
        stale_reason(&err),
        StaleReason::FingerprintMismatch { .. }
    ));
    assert_eq!(backend.writes(), 0);
    // The pending plan is untouched and can still be applied under C1.
    assert!(store.contains(&plan_a.id));
}

#[tokio::test]
async fn test_newer_plan_supersedes_older_one() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let c1 = resolved(NETWORK_MANIFEST);
    let c2 = network_manifest_with("10.1.0.0/16");

    let plan_a = plan_apply::plan(&backend, &store, &reporter, &c1, &opts())
        .await
        .unwrap();
    let plan_b = plan_apply::plan(&backend, &store, &reporter, &c2, &opts())
        .await
        .unwrap();

    assert!(
        reporter
            .warnings()
            .iter()
            .any(|w| w.contains("Discarded unapplied plan") && w.contains(&plan_a.id))
    );

    let err = plan_apply::apply(&backend, &store, &reporter, &c1, &plan_a.id, &opts())
        .await
        .unwrap_err();
    assert_eq!(
        stale_reason(&err),
        &StaleReason::Superseded {
            latest: plan_b.id.clone()
        }
    );

    let report = plan_apply::apply(&backend, &store, &reporter, &c2, &plan_b.id, &opts())
        .await
        .unwrap();
    assert_eq!(report.serial, 1);
    let state = backend.state(&c2.state_ref).unwrap();
    assert_eq!(state.resources["vnet"].properties["address_space"], "10.1.0.0/16");
}

#[tokio::test]
async fn test_apply_refuses_when_state_moved_since_planning() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    backend.bump_serial(&manifest.state_ref);

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap_err();

    assert_eq!(
        stale_reason(&err),
        &StaleReason::StateMoved {
            planned: 0,
            current: 1
        }
    );
    assert_eq!(backend.writes(), 0);
    assert_eq!(store.run(&manifest.state_ref).unwrap().stage, RunStage::Failed);
    assert!(!store.contains(&plan.id));
    assert!(backend.holder(&manifest.state_ref).is_none());
}

#[tokio::test]
async fn test_expired_plan_is_stale() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let short = RunOptions {
        artifact_ttl: chrono::Duration::zero(),
        ..opts()
    };
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &short)
        .await
        .unwrap();

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap_err();

    assert!(matches!(stale_reason(&err), StaleReason::Expired { .. }));
}

#[tokio::test]
async fn test_failed_write_releases_lock_and_marks_run_failed() {
    let (backend, store, reporter) = (
        MemoryBackend::failing_writes(),
        MemoryStore::new(),
        RecordingReporter::new(),
    );
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("storage unavailable"));
    assert!(backend.holder(&manifest.state_ref).is_none());
    assert_eq!(store.run(&manifest.state_ref).unwrap().stage, RunStage::Failed);
    assert!(!store.contains(&plan.id), "a failed apply still consumes the plan");
}

#[tokio::test]
async fn test_plan_fails_fast_when_state_is_locked() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let holder = backend.hold_lock(&manifest.state_ref, "other@runner");

    let err = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap_err();

    match err.downcast_ref::<StateError>() {
        Some(StateError::LockContention { holder: h, .. }) => assert_eq!(h.id, holder.id),
        other => panic!("expected contention, got {other:?}"),
    }
    assert_eq!(classify(&err).0, exit_code::LOCK_CONTENTION);
    assert_eq!(backend.holder(&manifest.state_ref).unwrap().id, holder.id, "foreign lock kept");
    assert!(store.run(&manifest.state_ref).is_none());
}

#[tokio::test]
async fn test_plan_times_out_waiting_for_lock() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    backend.hold_lock(&manifest.state_ref, "other@runner");
    let waiting = RunOptions {
        lock: LockPolicy {
            timeout: Duration::from_millis(120),
            poll_interval: Duration::from_millis(20),
        },
        ..opts()
    };

    let err = plan_apply::plan(&backend, &store, &reporter, &manifest, &waiting)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::LockTimeout { .. })
    ));
    assert_eq!(classify(&err).0, exit_code::LOCK_TIMEOUT);
    assert!(reporter.steps().iter().any(|s| s.contains("other@runner")));
}

#[tokio::test]
async fn test_apply_fails_fast_when_state_is_locked() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    let holder = backend.hold_lock(&manifest.state_ref, "other@runner");

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap_err();

    match err.downcast_ref::<StateError>() {
        Some(StateError::LockContention { holder: h, .. }) => assert_eq!(h.id, holder.id),
        other => panic!("expected contention, got {other:?}"),
    }
    assert_eq!(classify(&err).0, exit_code::LOCK_CONTENTION);
    assert_eq!(backend.holder(&manifest.state_ref).unwrap().id, holder.id);
    assert_eq!(backend.writes(), 0);
    assert_eq!(store.run(&manifest.state_ref).unwrap().stage, RunStage::Planned);
    assert!(store.contains(&plan.id), "plan stays applicable once the lock frees up");

    backend.drop_lock(&manifest.state_ref);
    let report = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap();
    assert_eq!(report.serial, 1);
}

#[tokio::test]
async fn test_apply_times_out_waiting_for_lock() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    backend.hold_lock(&manifest.state_ref, "other@runner");
    let waiting = RunOptions {
        lock: LockPolicy {
            timeout: Duration::from_millis(120),
            poll_interval: Duration::from_millis(20),
        },
        ..opts()
    };

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &waiting)
        .await
        .unwrap_err();

    assert_eq!(classify(&err).0, exit_code::LOCK_TIMEOUT);
    assert_eq!(store.run(&manifest.state_ref).unwrap().stage, RunStage::Planned);
    assert_eq!(backend.writes(), 0);
}

#[tokio::test]
async fn test_output_only_change_is_applied_as_a_change() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let first = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    plan_apply::apply(&backend, &store, &reporter, &manifest, &first.id, &opts())
        .await
        .unwrap();

    let edited = resolved(&NETWORK_MANIFEST.replace("vnet_location: ${var.location}", "vnet_location: northeurope"));
    let plan = plan_apply::plan(&backend, &store, &reporter, &edited, &opts())
        .await
        .unwrap();
    assert!(plan.changes.is_empty());
    assert!(plan.summary().has_changes());
    assert_eq!(plan.changed_outputs, vec!["vnet_location".to_string()]);

    let report = plan_apply::apply(&backend, &store, &reporter, &edited, &plan.id, &opts())
        .await
        .unwrap();
    assert_eq!(report.serial, 2);
    assert_eq!(report.summary.outputs, 1);
    assert_eq!(backend.state(&edited.state_ref).unwrap().outputs["vnet_location"], "northeurope");
}

#[tokio::test]
async fn test_plan_waits_for_lock_to_be_released() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    backend.hold_lock(&manifest.state_ref, "other@runner");
    let waiting = RunOptions {
        lock: LockPolicy {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        },
        ..opts()
    };

    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.drop_lock(&manifest.state_ref);
    };
    let (planned, ()) = tokio::join!(
        plan_apply::plan(&backend, &store, &reporter, &manifest, &waiting),
        release
    );

    assert!(planned.is_ok());
}

#[tokio::test]
async fn test_no_change_plan_applies_without_writing() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let first = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    plan_apply::apply(&backend, &store, &reporter, &manifest, &first.id, &opts())
        .await
        .unwrap();

    let second = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();
    assert!(!second.summary().has_changes());
    let report = plan_apply::apply(&backend, &store, &reporter, &manifest, &second.id, &opts())
        .await
        .unwrap();

    assert_eq!(report.serial, 1);
    assert_eq!(backend.writes(), 1);
    assert_eq!(store.run(&manifest.state_ref).unwrap().stage, RunStage::Applied);
}

#[tokio::test]
async fn test_apply_rejects_malformed_artifact_id() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, "../../etc/passwd", &opts())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::InvalidArtifactId(_))
    ));
}

#[tokio::test]
async fn test_apply_unknown_artifact_is_not_found() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let id = uuid::Uuid::new_v4().to_string();

    let err = plan_apply::apply(&backend, &store, &reporter, &manifest, &id, &opts())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::ArtifactNotFound(_))
    ));
    assert_eq!(classify(&err).1, "artifact_not_found");
}

#[tokio::test]
async fn test_apply_report_masks_sensitive_outputs() {
    let yaml = "\
environment: prod
backend: {storage_account: acct001, container: tfstate}
resources:
  db:
    kind: sql_server
    properties:
      admin_password: ${env.DB_PASSWORD}
outputs:
  db_password: ${env.DB_PASSWORD}
";
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(yaml);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();

    let report = plan_apply::apply(&backend, &store, &reporter, &manifest, &plan.id, &opts())
        .await
        .unwrap();

    assert_eq!(report.outputs["db_password"], SENSITIVE_PLACEHOLDER);
    let json = serde_json::to_string(&report).unwrap();
    assert!(!json.contains("hunter2"));
    // The state itself keeps the real value.
    let state = backend.state(&manifest.state_ref).unwrap();
    assert_eq!(state.outputs["db_password"], "hunter2");
}

#[tokio::test]
async fn test_prune_removes_only_expired_artifacts() {
    let (backend, store, reporter) = (MemoryBackend::new(), MemoryStore::new(), RecordingReporter::new());
    let manifest = resolved(NETWORK_MANIFEST);
    let plan = plan_apply::plan(&backend, &store, &reporter, &manifest, &opts())
        .await
        .unwrap();

    let now = chrono::Utc::now();
    let report = plan_apply::prune_artifacts(&store, now).await.unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.kept, 1);

    let later = now + chrono::Duration::hours(2);
    let report = plan_apply::prune_artifacts(&store, later).await.unwrap();
    assert_eq!(report.removed, vec![plan.id.clone()]);
    assert_eq!(report.kept, 0);
    assert!(!store.contains(&plan.id));
}
