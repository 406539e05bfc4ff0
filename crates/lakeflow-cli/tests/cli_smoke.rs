use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn lakeflow() -> Command {
    let mut cmd = Command::cargo_bin("lakeflow").unwrap();
    cmd.env_remove("LAKEFLOW_LOG")
        .env_remove("LAKEFLOW_ENDPOINT")
        .env_remove("LAKEFLOW_TOKEN")
        .env_remove("LAKEFLOW_PARALLEL");
    cmd
}

fn init_config(dir: &Path) -> std::path::PathBuf {
    let cfg = dir.join("lakeflow.yaml");
    lakeflow()
        .args(["init", "--config"])
        .arg(&cfg)
        .assert()
        .success();
    cfg
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = init_config(dir.path());
    assert!(cfg.exists());

    lakeflow()
        .args(["init", "--config"])
        .arg(&cfg)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn validate_accepts_the_sample_and_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = init_config(dir.path());

    lakeflow()
        .args(["validate", "--strict", "--config"])
        .arg(&cfg)
        .assert()
        .success()
        .stderr(predicate::str::contains("Config OK"));

    let bad = dir.path().join("bad.yaml");
    std::fs::write(
        &bad,
        std::fs::read_to_string(&cfg)
            .unwrap()
            .replace("optimized_suffix: data_parquet", "optimized_suffix: data_csv"),
    )
    .unwrap();
    lakeflow()
        .args(["validate", "--format", "json", "--config"])
        .arg(&bad)
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"ok\": false"));
}

#[test]
fn plan_prints_bootstrap_and_incremental_statements() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = init_config(dir.path());

    lakeflow()
        .args(["plan", "--config"])
        .arg(&cfg)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "CREATE DATABASE IF NOT EXISTS traffic_camera",
        ))
        .stdout(predicate::str::contains(
            "INSERT INTO traffic_camera.traffic_offences_data_parquet",
        ));
}

#[test]
fn memory_run_bootstraps_and_records_history() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = init_config(dir.path());
    let db = dir.path().join("state.db");

    lakeflow()
        .args(["run", "--engine", "memory", "--format", "json", "--config"])
        .arg(&cfg)
        .arg("--db")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\": \"bootstrap\""))
        .stdout(predicate::str::contains("\"final_state\": \"done\""));

    lakeflow()
        .args(["history", "--db"])
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("traffic_camera"))
        .stdout(predicate::str::contains("done"));

    let conn = rusqlite::Connection::open(&db).unwrap();
    let fingerprints: i64 = conn
        .query_row("SELECT COUNT(*) FROM fingerprints", [], |r| r.get(0))
        .unwrap();
    assert_eq!(fingerprints, 1);
    let leases: i64 = conn
        .query_row("SELECT COUNT(*) FROM leases", [], |r| r.get(0))
        .unwrap();
    assert_eq!(leases, 0);
}

#[test]
fn live_lease_blocks_a_second_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = init_config(dir.path());
    let db = dir.path().join("state.db");

    // First run creates the store; then plant a lease held by someone else.
    lakeflow()
        .args(["run", "--engine", "memory", "--config"])
        .arg(&cfg)
        .arg("--db")
        .arg(&db)
        .assert()
        .success();
    let conn = rusqlite::Connection::open(&db).unwrap();
    conn.execute(
        "INSERT INTO leases(name, holder, acquired_at, expires_at)
         VALUES ('run:traffic_camera', 'other-host', '2020-01-01T00:00:00.000Z', '2999-01-01T00:00:00.000Z')",
        [],
    )
    .unwrap();

    lakeflow()
        .args(["run", "--engine", "memory", "--config"])
        .arg(&cfg)
        .arg("--db")
        .arg(&db)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("other-host"));
}

#[test]
fn http_engine_without_endpoint_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = init_config(dir.path());

    lakeflow()
        .args(["run", "--config"])
        .arg(&cfg)
        .arg("--db")
        .arg(dir.path().join("state.db"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--endpoint"));
}
