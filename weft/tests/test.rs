use assert_cmd::prelude::{CommandCargoExt, OutputAssertExt};
use predicates::prelude::*;
use std::process::Command;

fn weft(args: &[&str]) -> assert_cmd::assert::Assert {
    Command::cargo_bin(env!("CARGO_PKG_NAME"))
        .expect("binary builds")
        .args(args)
        .assert()
}

#[test]
fn lists_demo_typechecks() {
    weft(&["-g", "../demos/lists.weft"])
        .success()
        .stdout(
            predicate::str::contains("nums: List Integer")
                .and(predicate::str::contains("doubled: List Integer"))
                .and(predicate::str::contains("total: Integer"))
                .and(predicate::str::contains("backwards: List Integer")),
        );
}

#[test]
fn publish_pair_typechecks() {
    weft(&[
        "-g",
        "../demos/publish.weft",
        "../demos/subscribe.weft",
    ])
    .success()
    .stdout(
        predicate::str::contains("all_flags: List String")
            .and(predicate::str::contains("flag_count: Integer"))
            .and(predicate::str::contains("greeting: String")),
    );
}

#[test]
fn value_cycle_aborts() {
    weft(&["../demos/cycle.weft"])
        .failure()
        .stderr(
            predicate::str::contains("Value definition cycle")
                .and(predicate::str::contains("Aborting without execution")),
        );
}

#[test]
fn stop_after_parse_prints_the_tree() {
    weft(&["--stop-after-parse", "../demos/lists.weft"])
        .success()
        .stdout(predicate::str::contains("def nums"));
}

#[test]
fn missing_file_is_an_error() {
    weft(&["../demos/no-such-file.weft"]).failure();
}
