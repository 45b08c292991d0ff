//! End-to-end CLI behavior: the binary's flag surface, invoked as a
//! subprocess via `assert_cmd`.
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn version_flag_prints_the_crate_version() {
    let mut cmd = Command::cargo_bin("hostwatchd").expect("binary");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_flag_lists_the_entry_point_flags() {
    let mut cmd = Command::cargo_bin("hostwatchd").expect("binary");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--foreground"));
}

#[test]
fn unknown_flag_is_rejected_before_any_daemon_startup() {
    let mut cmd = Command::cargo_bin("hostwatchd").expect("binary");
    cmd.arg("--not-a-real-flag").assert().failure();
}
