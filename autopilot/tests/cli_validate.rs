use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use autopilot::exit_codes;
use autopilot::test_support::SAMPLE_WORKFLOW_TOML;

const CONFIG: &str = r#"
workflow = "workflow.toml"
tracker = "tracker.json"
artifact_dir = "artifacts"
"#;

fn autopilot(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autopilot"))
        .arg("--config")
        .arg(dir.join("config.toml"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("spawn autopilot")
}

fn write_workspace(dir: &Path, workflow: &str) {
    fs::write(dir.join("config.toml"), CONFIG).expect("write config");
    fs::write(dir.join("workflow.toml"), workflow).expect("write workflow");
}

#[test]
fn validate_accepts_sample_workflow() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_workspace(temp.path(), SAMPLE_WORKFLOW_TOML);

    let out = autopilot(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout.trim(), "ok: 5 states, 2 issue types, 0 projects");
}

#[test]
fn validate_lists_workflow_violations() {
    let temp = tempfile::tempdir().expect("tempdir");
    let broken = SAMPLE_WORKFLOW_TOML.replace(
        "[[priorities]]\nissue_type = \"Task\"\nstate = \"Todo\"\n",
        "",
    );
    assert_ne!(broken, SAMPLE_WORKFLOW_TOML);
    write_workspace(temp.path(), &broken);

    let out = autopilot(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("missing priority (Task, Todo)"), "{stderr}");
}

#[test]
fn run_once_without_tickets_is_idle() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_workspace(temp.path(), SAMPLE_WORKFLOW_TOML);

    let out = autopilot(temp.path(), &["run-once"]);
    assert_eq!(out.status.code(), Some(exit_codes::IDLE));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "idle");
}

#[test]
fn missing_config_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = autopilot(temp.path(), &["validate"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("config.toml"));
}
