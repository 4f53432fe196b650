mod common;

use common::{sealed_tree, treeseal_cmd};
use predicates::prelude::*;
use std::fs;

#[test]
fn verify_success_when_clean() {
    let temp = sealed_tree(&[("file.txt", "hello")]);

    treeseal_cmd(temp.path())
        .arg("-v")
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Verification successful"));
}

#[test]
fn verify_fails_on_new_file() {
    let temp = sealed_tree(&[("file.txt", "hello")]);
    fs::write(temp.path().join("new.txt"), "new").unwrap();

    treeseal_cmd(temp.path())
        .arg("verify")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("+ new.txt"))
        .stderr(predicate::str::contains("Verification failed: 1 change(s) detected"));
}

#[test]
fn verify_fails_on_modified_file() {
    let temp = sealed_tree(&[("file.txt", "hello")]);
    fs::write(temp.path().join("file.txt"), "changed").unwrap();

    treeseal_cmd(temp.path())
        .arg("verify")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("W file.txt"))
        .stderr(predicate::str::contains("Verification failed"));
}

#[test]
fn verify_with_c_flag_changes_directory() {
    let temp = sealed_tree(&[("subdir/file.txt", "hello")]);
    let subdir = temp.path().join("subdir");

    treeseal_cmd(&subdir)
        .arg("verify")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("Not initialized"));

    treeseal_cmd(temp.path()).arg("verify").assert().success();
}

#[test]
fn verify_missing_directory_fails() {
    let temp = sealed_tree(&[("file.txt", "hello")]);

    treeseal_cmd(&temp.path().join("does-not-exist"))
        .arg("verify")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("Failed to change directory"));
}
