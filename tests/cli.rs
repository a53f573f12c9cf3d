//! Integration tests for the command line

use assert_cmd::assert::OutputAssertExt;
use assert_cmd::cargo_bin;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;

fn rowjinja(dir: &Path) -> Command {
    let mut cmd = Command::new(cargo_bin!(env!("CARGO_PKG_NAME")));
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("people.csv"), "Name,Age\nAlice,31\nBob,27\n").unwrap();
    fs::write(dir.path().join("card.tpl"), "{{ name }} is {{ age }}{{ suffix }}\n").unwrap();
    dir
}

#[test]
fn test_cli_help_flag() {
    let dir = tempfile::tempdir().unwrap();
    rowjinja(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--extra-vars"));
}

#[test]
fn test_cli_renders_each_row() {
    let dir = project();
    rowjinja(dir.path())
        .args(["-i", "people.csv", "-t", "card.tpl", "-o", "out/{{ name | lower }}.txt"])
        .args(["-e", "suffix=."])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(dir.path().join("out/alice.txt")).unwrap(), "Alice is 31.");
    assert_eq!(fs::read_to_string(dir.path().join("out/bob.txt")).unwrap(), "Bob is 27.");
}

#[test]
fn test_cli_reads_environment() {
    let dir = project();
    rowjinja(dir.path())
        .env("ROWJINJA_INPUT", "people.csv")
        .env("ROWJINJA_TEMPLATE", "card.tpl")
        .env("ROWJINJA_OUTPUT", "{{ name }}.out")
        .env("ROWJINJA_VARS", "{suffix: '!'}")
        .env("ROWJINJA_SKIP", "{{ age < 30 }}")
        .assert()
        .success();

    assert_eq!(fs::read_to_string(dir.path().join("Alice.out")).unwrap(), "Alice is 31!");
    assert!(!dir.path().join("Bob.out").exists());
}

#[test]
fn test_cli_config_file() {
    let dir = project();
    fs::write(
        dir.path().join("job.yml"),
        "input: people.csv\ntemplate: card.tpl\noutput: '{{ name }}.md'\nvars:\n  suffix: ''\n",
    )
    .unwrap();
    rowjinja(dir.path()).args(["-c", "job.yml"]).assert().success();
    assert_eq!(fs::read_to_string(dir.path().join("Bob.md")).unwrap(), "Bob is 27");
}

#[test]
fn test_cli_missing_options_fail() {
    let dir = tempfile::tempdir().unwrap();
    rowjinja(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("input"))
        .stderr(predicate::str::contains("template"));
}

#[test]
fn test_cli_missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    rowjinja(dir.path()).args(["-c", "absent.yml"]).assert().code(1);
}

#[test]
fn test_cli_existing_output_without_force() {
    let dir = project();
    fs::write(dir.path().join("Alice.txt"), "keep").unwrap();
    let args = ["-i", "people.csv", "-t", "card.tpl", "-o", "{{ name }}.txt", "-e", "suffix="];

    rowjinja(dir.path())
        .args(args)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(fs::read_to_string(dir.path().join("Alice.txt")).unwrap(), "keep");

    rowjinja(dir.path()).args(args).arg("--force").assert().success();
    assert_eq!(fs::read_to_string(dir.path().join("Alice.txt")).unwrap(), "Alice is 31");
}

#[test]
fn test_cli_malformed_extra_var_is_a_usage_error() {
    let dir = project();
    rowjinja(dir.path())
        .args(["-i", "people.csv", "-e", "oops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key=value"));
}
