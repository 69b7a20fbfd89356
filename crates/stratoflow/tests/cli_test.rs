#![allow(deprecated)]

mod common;

use assert_cmd::Command;
use common::{INSTANCE_CONFIG, TestProject};
use predicates::prelude::*;
use stratoflow_engine::{
    FileStateStore, Lifecycle, ObservedState, ResourceAddress, StateStore, Value, attributes,
};

/// Help lists every subcommand
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("strato").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("state"));
}

/// Version works without a project
#[test]
fn test_cli_version() {
    let project = TestProject::new();
    project
        .strato()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("strato"));
}

/// Catalog lists the built-in resource types
#[test]
fn test_catalog_lists_types() {
    let project = TestProject::new();
    project
        .strato()
        .arg("catalog")
        .assert()
        .success()
        .stdout(predicate::str::contains("clickhouse_instance"))
        .stdout(predicate::str::contains("clickhouse_backup_job"))
        .stdout(predicate::str::contains("monitor_alarm_notice"));
}

/// Catalog for one type shows its delete steps and replacement attributes
#[test]
fn test_catalog_single_type() {
    let project = TestProject::new();
    project
        .strato()
        .args(["catalog", "clickhouse_instance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("IsolateInstance"))
        .stdout(predicate::str::contains("forces replacement"))
        .stdout(predicate::str::contains("monitor_alarm_notice").not());
}

#[test]
fn test_catalog_unknown_type() {
    let project = TestProject::new();
    project
        .strato()
        .args(["catalog", "no_such_type"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown resource type 'no_such_type'"));
}

/// Without any config file, project commands explain where they looked
#[test]
fn test_missing_config() {
    let project = TestProject::new();
    project
        .strato()
        .args(["state", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No configuration file found"));
}

#[test]
fn test_invalid_config_rejected() {
    let project = TestProject::new();
    project.write_config("endpoint: https://api.example.com\nconcurrency: 0\n");
    project
        .strato()
        .args(["state", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

/// The config is discovered in the working directory
#[test]
fn test_state_list_empty() {
    let project = TestProject::new();
    project.write_config(INSTANCE_CONFIG);
    project
        .strato()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No managed resources"));
}

#[test]
fn test_plan_requires_token() {
    let project = TestProject::new();
    project.write_config(INSTANCE_CONFIG);
    project
        .strato()
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("API token not set"))
        .stderr(predicate::str::contains("STRATOFLOW_API_TOKEN"));
}

/// With no state, planning a declared resource needs no remote call
#[test]
fn test_plan_new_resource() {
    let project = TestProject::new();
    let config = project.write_config(INSTANCE_CONFIG);
    project
        .strato()
        .arg("--config")
        .arg(&config)
        .arg("plan")
        .env("STRATOFLOW_API_TOKEN", "test-token")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "clickhouse_instance.main will be created",
        ))
        .stdout(predicate::str::contains(
            "1 to create, 0 to update, 0 to replace, 0 to delete, 0 unchanged",
        ));
}

#[test]
fn test_plan_unknown_target() {
    let project = TestProject::new();
    project.write_config(INSTANCE_CONFIG);
    project
        .strato()
        .args(["plan", "--target", "clickhouse_instance.other"])
        .env("STRATOFLOW_API_TOKEN", "test-token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not declared"));
}

#[test]
fn test_plan_rejects_missing_required_attribute() {
    let project = TestProject::new();
    project.write_config(
        r#"
endpoint: http://127.0.0.1:9
resources:
  - type: clickhouse_instance
    name: main
    config:
      name: analytics
      zone: ap-tokyo-3
"#,
    );
    project
        .strato()
        .arg("plan")
        .env("STRATOFLOW_API_TOKEN", "test-token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config for clickhouse_instance.main"));
}

#[test]
fn test_plan_unknown_resource_type() {
    let project = TestProject::new();
    project.write_config(
        r#"
endpoint: http://127.0.0.1:9
resources:
  - type: mystery_box
    name: main
    config: {}
"#,
    );
    project
        .strato()
        .arg("plan")
        .env("STRATOFLOW_API_TOKEN", "test-token")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown resource type 'mystery_box'"));
}

async fn seed_state(project: &TestProject) {
    let store = FileStateStore::new(project.state_dir());
    let mut state = ObservedState::new(
        "cdw-42",
        "clickhouse_instance",
        attributes([
            ("name", Value::from("analytics")),
            ("zone", Value::from("ap-tokyo-3")),
            ("status", Value::from("Serving")),
        ]),
    );
    state.lifecycle = Lifecycle::Stable;
    store
        .save(&ResourceAddress::new("clickhouse_instance", "main"), &state)
        .await
        .unwrap();
}

/// State commands read the store without touching the remote
#[tokio::test]
async fn test_state_list_and_show() {
    let project = TestProject::new();
    project.write_config(INSTANCE_CONFIG);
    seed_state(&project).await;

    project
        .strato()
        .args(["state", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("clickhouse_instance.main"))
        .stdout(predicate::str::contains("cdw-42"))
        .stdout(predicate::str::contains("stable"));

    project
        .strato()
        .args(["state", "show", "clickhouse_instance.main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"cdw-42\""))
        .stdout(predicate::str::contains("\"zone\": \"ap-tokyo-3\""));
}

#[tokio::test]
async fn test_state_show_unknown_address() {
    let project = TestProject::new();
    project.write_config(INSTANCE_CONFIG);
    seed_state(&project).await;

    project
        .strato()
        .args(["state", "show", "clickhouse_instance.other"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not in the state"));
}
