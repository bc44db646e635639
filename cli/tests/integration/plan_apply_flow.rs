//! End-to-end plan/apply through the binary.
//!
//! Each test gets its own temp workspace: config file, backend root,
//! artifact directory and manifest are all under one `TempDir`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const MANIFEST: &str = "\
environment: dev
backend:
  storage_account: acct001
  container: tfstate
variables:
  location: westeurope
resources:
  rg:
    kind: resource_group
    properties:
      location: ${var.location}
  vnet:
    kind: virtual_network
    properties:
      location: ${var.location}
      address_space: 10.0.0.0/16
outputs:
  rg_location: ${var.location}
";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = format!(
            "backend:\n  root: '{}'\nartifacts:\n  dir: '{}'\n",
            dir.path().join("backend").display(),
            dir.path().join("plans").display()
        );
        std::fs::write(dir.path().join("config.yaml"), config).unwrap();
        let ws = Self { dir };
        ws.write_manifest(MANIFEST);
        ws
    }

    fn write_manifest(&self, content: &str) {
        std::fs::write(self.manifest_path(), content).unwrap();
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.path().join("deployment.yaml")
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.path().join("backend/acct001/tfstate/dev.tfstate.lock")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("infrasync"));
        cmd.env("NO_COLOR", "1")
            .env("INFRASYNC_CONFIG", self.dir.path().join("config.yaml"))
            .env("INFRASYNC_MANIFEST", self.manifest_path())
            .env_remove("CI")
            .env_remove("INFRASYNC_YES")
            .env_remove("RUST_LOG");
        cmd
    }

    fn json(&self, args: &[&str]) -> (Option<i32>, Value) {
        let output = self.cmd().args(args).arg("--json").output().unwrap();
        let value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
            panic!(
                "invalid JSON from {args:?}: {e}\nstdout: {}\nstderr: {}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
        });
        (output.status.code(), value)
    }

    fn plan_id(&self) -> String {
        let (code, plan) = self.json(&["plan"]);
        assert_eq!(code, Some(0), "plan failed: {plan}");
        plan["id"].as_str().unwrap().to_string()
    }
}

#[test]
fn test_plan_then_apply_writes_state() {
    let ws = Workspace::new();
    let (code, plan) = ws.json(&["plan"]);
    assert_eq!(code, Some(0));
    assert_eq!(plan["summary"]["create"], 2);
    assert_eq!(plan["state"], "acct001/tfstate/dev.tfstate");
    let id = plan["id"].as_str().unwrap();

    let (code, report) = ws.json(&["apply", id]);
    assert_eq!(code, Some(0), "apply failed: {report}");
    assert_eq!(report["serial"], 1);

    let (code, state) = ws.json(&["state", "show"]);
    assert_eq!(code, Some(0));
    assert_eq!(state["exists"], true);
    assert_eq!(state["document"]["serial"], 1);
    assert_eq!(
        state["document"]["resources"]["vnet"]["properties"]["address_space"],
        "10.0.0.0/16"
    );
    assert!(!ws.lock_path().exists(), "lock released after apply");
}

#[test]
fn test_second_apply_of_same_plan_exits_stale() {
    let ws = Workspace::new();
    let id = ws.plan_id();
    ws.cmd().args(["apply", &id]).assert().success();

    ws.cmd()
        .args(["apply", &id])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already been consumed"));
}

#[test]
fn test_apply_after_manifest_edit_exits_stale() {
    let ws = Workspace::new();
    let id = ws.plan_id();
    ws.write_manifest(&MANIFEST.replace("10.0.0.0/16", "10.1.0.0/16"));

    let (code, err) = ws.json(&["apply", &id]);
    assert_eq!(code, Some(3));
    assert_eq!(err["error"], true);
    assert_eq!(err["code"], "stale_artifact");
    assert!(err["message"].as_str().unwrap().contains("fingerprint changed"));

    let (code, state) = ws.json(&["state", "show"]);
    assert_eq!(code, Some(0));
    assert_eq!(state["exists"], false, "stale apply never writes state");
}

#[test]
fn test_detailed_exitcode_reports_pending_changes() {
    let ws = Workspace::new();
    let output = ws
        .cmd()
        .args(["plan", "--detailed-exitcode", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let plan: Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = plan["id"].as_str().unwrap();
    ws.cmd().args(["apply", id]).assert().success();

    ws.cmd()
        .args(["plan", "--detailed-exitcode"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn test_output_only_edit_counts_as_a_change() {
    let ws = Workspace::new();
    ws.cmd().args(["run", "--yes"]).assert().success();
    ws.write_manifest(&MANIFEST.replace("rg_location: ${var.location}", "rg_location: northeurope"));

    let output = ws
        .cmd()
        .args(["plan", "--detailed-exitcode", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let plan: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["summary"]["outputs"], 1);
    assert_eq!(plan["changed_outputs"][0], "rg_location");

    let (code, report) = ws.json(&["apply", plan["id"].as_str().unwrap()]);
    assert_eq!(code, Some(0), "apply failed: {report}");
    assert_eq!(report["serial"], 2);
    assert_eq!(report["outputs"]["rg_location"], "northeurope");
}

#[test]
fn test_plan_fails_fast_when_lock_is_held() {
    let ws = Workspace::new();
    std::fs::create_dir_all(ws.lock_path().parent().unwrap()).unwrap();
    let holder = serde_json::json!({
        "id": "8d2b8c8e-0000-4000-8000-000000000001",
        "operation": "apply",
        "who": "other@runner",
        "created": "2026-01-01T00:00:00Z",
    });
    std::fs::write(ws.lock_path(), holder.to_string()).unwrap();

    let (code, err) = ws.json(&["plan"]);
    assert_eq!(code, Some(4));
    assert_eq!(err["code"], "lock_contention");
    assert!(err["message"].as_str().unwrap().contains("other@runner"));

    let (code, info) = ws.json(&["state", "lock-info"]);
    assert_eq!(code, Some(0));
    assert_eq!(info["locked"], true);
    assert_eq!(info["lock"]["who"], "other@runner");

    ws.cmd()
        .args([
            "state",
            "force-unlock",
            "8d2b8c8e-0000-4000-8000-000000000001",
            "--yes",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Released lock"));
    assert!(!ws.lock_path().exists());
    ws.cmd().arg("plan").assert().success();
}

#[test]
fn test_run_with_yes_plans_and_applies() {
    let ws = Workspace::new();
    let (code, out) = ws.json(&["run", "--yes"]);
    assert_eq!(code, Some(0), "run failed: {out}");
    assert_eq!(out["applied"], true);
    assert_eq!(out["apply"]["serial"], 1);

    let (_, artifacts) = ws.json(&["artifacts", "list"]);
    assert_eq!(artifacts["artifacts"].as_array().unwrap().len(), 0, "consumed");
}

#[test]
fn test_show_and_list_recorded_plan() {
    let ws = Workspace::new();
    let id = ws.plan_id();

    let (code, shown) = ws.json(&["show", &id]);
    assert_eq!(code, Some(0));
    assert_eq!(shown["id"], id.as_str());

    let (_, listed) = ws.json(&["artifacts", "list"]);
    let entries = listed["artifacts"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], id.as_str());
    assert_eq!(entries[0]["expired"], false);
}

#[test]
fn test_secret_from_environment_never_reaches_output() {
    let ws = Workspace::new();
    ws.write_manifest(
        "environment: dev\nbackend: {storage_account: acct001, container: tfstate}\nresources:\n  db:\n    kind: sql_server\n    properties:\n      admin_password: ${env.DB_PASSWORD}\n",
    );

    let output = ws
        .cmd()
        .env("DB_PASSWORD", "hunter2-very-secret")
        .args(["plan"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("hunter2-very-secret"), "leaked: {stdout}");
    assert!(stdout.contains("(sensitive)"));

    ws.cmd()
        .env("DB_PASSWORD", "hunter2-very-secret")
        .args(["run", "--yes"])
        .assert()
        .success();
    let (code, state) = ws.json(&["state", "show"]);
    assert_eq!(code, Some(0));
    assert_eq!(
        state["document"]["resources"]["db"]["properties"]["admin_password"],
        "(sensitive)"
    );
    assert!(!state.to_string().contains("hunter2-very-secret"));
}

#[test]
fn test_missing_env_reference_fails_plan() {
    let ws = Workspace::new();
    ws.write_manifest(
        "environment: dev\nbackend: {storage_account: acct001, container: tfstate}\nresources:\n  db:\n    kind: sql_server\n    properties:\n      admin_password: ${env.INFRASYNC_TEST_UNSET_SECRET}\n",
    );

    let (code, err) = ws.json(&["plan"]);
    assert_eq!(code, Some(1));
    assert_eq!(err["code"], "invalid_manifest");
}
