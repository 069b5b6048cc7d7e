use assert_cmd::Command;
use predicates::prelude::*;

const MAGIC_MISSILE: &str = "Compendium.demo.spells.Item.magic-missile";

fn spellprep() -> Command {
    Command::cargo_bin("spellprep").unwrap()
}

#[test]
fn classes_lists_limits() {
    spellprep()
        .args(["classes", "elara"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wizard L3 spells 1/6 cantrips 2/3 max level 2"));
}

#[test]
fn view_shows_statuses() {
    spellprep()
        .args(["view", "elara", "wizard"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prepared   Shield"))
        .stdout(predicate::str::contains("Detect Magic (ritual)"));
}

#[test]
fn prepared_world_can_be_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("world.json");

    spellprep()
        .args(["prepare", "elara", "wizard", "--add", MAGIC_MISSILE, "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("+ Magic Missile"));

    spellprep()
        .arg("--world")
        .arg(&out)
        .args(["classes", "elara"])
        .assert()
        .success()
        .stdout(predicate::str::contains("spells 2/6"));
}

#[test]
fn observers_cannot_prepare() {
    spellprep()
        .args(["--user", "bob", "prepare", "elara", "wizard", "--add", MAGIC_MISSILE])
        .assert()
        .failure()
        .stderr(predicate::str::contains("may not modify actor elara"));
}

#[test]
fn party_summary() {
    spellprep()
        .args(["party", "elara", "bram"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Elara focus damage prepared 3"))
        .stdout(predicate::str::contains("Bram focus healer prepared 2"));
}

#[test]
fn dump_prints_json() {
    spellprep()
        .args(["dump", "--compact"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"));
}

#[test]
fn unknown_builtin_world_fails() {
    spellprep()
        .args(["--builtin", "nowhere", "dump"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown builtin world"));
}
