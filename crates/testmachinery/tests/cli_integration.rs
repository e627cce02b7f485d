//! CLI integration tests for the `tm` command-line interface.
//!
//! These tests verify:
//! - Help text and global flags
//! - compile / validate / sync / reconcile round trips over files
//!
//! Every test points `TM_CONFIG_DIR` at a temp dir with file logging off, and
//! runs from a temp working directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use testmachinery_types::manifest;
use testmachinery_types::{
    ConditionStatus, ConditionType, NodePhase, NodeStatus, Phase, Testrun, Workflow,
};

const TESTRUN: &str = r#"
metadata:
  name: smoke
spec:
  locations:
    - type: inline
      definitions:
        - { name: create, image: "busybox:1.36" }
        - { name: check, image: "busybox:1.36" }
  testflow:
    - name: main
      steps:
        - definition: create
        - definition: check
"#;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("config.toml"), "[logging]\nfile = false\n").unwrap();
        Self { dir }
    }

    fn tm(&self) -> Command {
        let mut cmd = Command::cargo_bin("tm").unwrap();
        cmd.current_dir(self.dir.path())
            .env("TM_CONFIG_DIR", self.dir.path().join("config"));
        cmd
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn load_testrun(path: &Path) -> Testrun {
    manifest::load(path).unwrap()
}

/// Mark every container template of the workflow at `path` as finished.
fn finish_workflow(path: &Path, phase: NodePhase) {
    finish_workflow_without(path, phase, &[]);
}

/// Like [`finish_workflow`], leaving out nodes for the `unscheduled` templates.
fn finish_workflow_without(path: &Path, phase: NodePhase, unscheduled: &[&str]) {
    let mut workflow: Workflow = manifest::load(path).unwrap();
    let names: Vec<String> = workflow
        .spec
        .templates
        .iter()
        .filter(|t| t.container.is_some() && !unscheduled.contains(&t.name.as_str()))
        .map(|t| t.name.clone())
        .collect();
    for (i, name) in names.iter().enumerate() {
        workflow
            .status
            .nodes
            .insert(format!("node-{}", i), NodeStatus::new(name, phase));
    }
    workflow.status.phase = Some(phase);
    manifest::save(&workflow, path).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    Env::new()
        .tm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Testmachinery"));
}

#[test]
fn test_version_displays() {
    Env::new()
        .tm()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tm"));
}

#[test]
fn test_help_lists_subcommands() {
    Env::new()
        .tm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("reconcile"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_global_flags_accepted() {
    let env = Env::new();
    env.tm().args(["--verbose", "--help"]).assert().success();
    env.tm().args(["--json", "--help"]).assert().success();
}

#[test]
fn test_unknown_policy_rejected() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", TESTRUN);
    env.tm()
        .args(["sync", "--policy", "loudest"])
        .arg(&testrun)
        .arg(env.path("wf.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown conflict policy"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Compile and Validate
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_compile_prints_workflow() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", TESTRUN);

    env.tm()
        .arg("compile")
        .arg(&testrun)
        .assert()
        .success()
        .stdout(predicate::str::contains("entrypoint: testrun"))
        .stdout(predicate::str::contains("onExit: exit-handler"))
        .stdout(predicate::str::contains("testflow-check-0-1"));
}

#[test]
fn test_compile_json_output() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", TESTRUN);

    let output = env
        .tm()
        .args(["--json", "compile", "--namespace", "qa"])
        .arg(&testrun)
        .output()
        .unwrap();
    assert!(output.status.success());

    let workflow: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(workflow["metadata"]["name"], "smoke-wf");
    assert_eq!(workflow["metadata"]["namespace"], "qa");
    assert_eq!(workflow["spec"]["ttlStrategy"]["secondsAfterCompletion"], 86400);
}

#[test]
fn test_compile_unknown_definition_fails() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", &TESTRUN.replace("definition: check", "definition: nope"));

    env.tm()
        .arg("compile")
        .arg(&testrun)
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_validate() {
    let env = Env::new();
    let good = env.write("good.yaml", TESTRUN);
    env.tm()
        .arg("validate")
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("smoke"));

    let bad = env.write("bad.yaml", &TESTRUN.replace("definition: check", "definition: nope"));
    env.tm()
        .args(["--json", "validate"])
        .arg(&bad)
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"valid\": false"))
        .stdout(predicate::str::contains("SpecificationError"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync and Reconcile
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_compile_then_sync() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", TESTRUN);
    let workflow = env.path("workflow.json");

    env.tm()
        .args(["compile", "--write-status", "-o"])
        .arg(&workflow)
        .arg(&testrun)
        .assert()
        .success();

    let compiled = load_testrun(&testrun);
    // main: prepare, one branch of two; exit: prepare, post-prepare
    assert_eq!(compiled.status.shape(), vec![1, 2, 1, 1]);
    assert!(compiled.status.iter_steps().all(|s| s.phase == Phase::Init));

    finish_workflow(&workflow, NodePhase::Succeeded);

    env.tm()
        .arg("sync")
        .arg(&testrun)
        .arg(&workflow)
        .assert()
        .success();

    let synced = load_testrun(&testrun);
    assert!(synced.status.all_steps_terminal());
    assert!(synced.status.iter_steps().all(|s| s.phase == Phase::Succeeded));

    // Unchanged input, unchanged output
    env.tm()
        .args(["--json", "sync"])
        .arg(&testrun)
        .arg(&workflow)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"updated\":0"));
    assert_eq!(load_testrun(&testrun), synced);
}

#[test]
fn test_sync_watch_stops_when_workflow_finished() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", TESTRUN);
    let workflow = env.path("workflow.json");

    env.tm()
        .args(["compile", "--write-status", "-o"])
        .arg(&workflow)
        .arg(&testrun)
        .assert()
        .success();

    // The engine gave up before scheduling `check`.
    finish_workflow_without(&workflow, NodePhase::Failed, &["testflow-check-0-1"]);

    env.tm()
        .args(["sync", "--watch", "--interval", "1"])
        .arg(&testrun)
        .arg(&workflow)
        .timeout(Duration::from_secs(30))
        .assert()
        .success();

    let synced = load_testrun(&testrun);
    assert!(!synced.status.all_steps_terminal());
    let check = synced
        .status
        .iter_steps()
        .find(|s| s.template_name.as_deref() == Some("testflow-check-0-1"))
        .unwrap();
    assert_eq!(check.phase, Phase::Init);
}

#[test]
fn test_reconcile_to_completion() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", TESTRUN);
    let workflow = env.path("workflow.yaml");

    env.tm()
        .args(["reconcile", "--workflow"])
        .arg(&workflow)
        .arg("-o")
        .arg(&workflow)
        .arg(&testrun)
        .assert()
        .success()
        .stderr(predicate::str::contains("compiled"));

    let compiled = load_testrun(&testrun);
    assert_eq!(compiled.status.workflow.as_deref(), Some("smoke-wf"));
    assert_eq!(
        compiled.status.condition(ConditionType::Compiled).unwrap().status,
        ConditionStatus::True
    );

    finish_workflow(&workflow, NodePhase::Succeeded);

    env.tm()
        .args(["--json", "reconcile", "--workflow"])
        .arg(&workflow)
        .arg(&testrun)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"synced\""));

    let finished = load_testrun(&testrun);
    assert_eq!(finished.status.phase, Phase::Succeeded);
    assert!(finished.status.completed_at.is_some());

    env.tm()
        .args(["--json", "reconcile", "--workflow"])
        .arg(&workflow)
        .arg(&testrun)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"outcome\": \"finished\""));
}

#[test]
fn test_reconcile_records_compile_failure() {
    let env = Env::new();
    let testrun = env.write("testrun.yaml", &TESTRUN.replace("definition: check", "definition: nope"));

    env.tm()
        .arg("reconcile")
        .arg(&testrun)
        .assert()
        .failure();

    let failed = load_testrun(&testrun);
    assert_eq!(failed.status.phase, Phase::Error);
    let condition = failed.status.condition(ConditionType::Compiled).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "SpecificationError");
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_env() {
    let env = Env::new();
    env.tm()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_local() {
    let env = Env::new();
    env.tm()
        .args(["config", "init", "--local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created settings file"));

    let written = fs::read_to_string(env.path("testmachinery.toml")).unwrap();
    assert!(written.contains("[workflow]"));

    env.tm()
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ loaded"));
}
