//! End-to-end tests for the `bs` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn bs(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("bs").unwrap();
    cmd.arg("--db").arg(db);
    cmd
}

/// Run a command and pull the task id out of "Created task: <id>"
fn create_task(db: &std::path::Path, project: &str, title: &str) -> String {
    let assert = bs(db).args(["create", project, title]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    stdout.trim().rsplit(' ').next().unwrap().to_string()
}

#[test]
fn test_create_list_close_flow() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("backlog.db");

    let id = create_task(&db, "p", "write the parser");
    assert!(id.starts_with("p-"));

    bs(&db)
        .args(["list", "p"])
        .assert()
        .success()
        .stdout(predicate::str::contains("write the parser"));

    bs(&db).args(["close", &id]).assert().success();

    bs(&db)
        .args(["list", "p", "--status", "open"])
        .assert()
        .success()
        .stdout(predicate::str::contains("write the parser").not());
}

#[test]
fn test_dependency_gating_through_cli() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("backlog.db");

    let root = create_task(&db, "p", "root work");
    let child = create_task(&db, "p", "child work");

    bs(&db).args(["dep-add", &child, &root]).assert().success();

    // Only the root is ready while the child is blocked
    bs(&db)
        .args(["ready", "p"])
        .assert()
        .success()
        .stdout(predicate::str::contains("root work").and(predicate::str::contains("child work").not()));

    bs(&db).args(["close", &root]).assert().success();

    bs(&db)
        .args(["ready", "p"])
        .assert()
        .success()
        .stdout(predicate::str::contains("child work"));
}

#[test]
fn test_cycle_rejected_through_cli() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("backlog.db");

    let a = create_task(&db, "p", "a");
    let b = create_task(&db, "p", "b");

    bs(&db).args(["dep-add", &a, &b]).assert().success();
    bs(&db)
        .args(["dep-add", &b, &a])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cycle"));
}
