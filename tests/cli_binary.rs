use assert_cmd::Command;
use predicates::str::contains;

const PSA_REFVAL_TEMPLATE: &str = include_str!("fixtures/psa-refval.json");

fn cmd() -> Command {
    Command::cargo_bin("comid").unwrap()
}

#[test]
fn create_writes_into_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ok.json"), PSA_REFVAL_TEMPLATE).unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["create", "--tmpl-file=ok.json", "--output-dir=out"])
        .assert()
        .success()
        .stdout("");

    assert!(dir
        .path()
        .join("out/43bbe37f-2e61-4b33-aed3-53cff1428b16.cbor")
        .is_file());
}

#[test]
fn create_without_templates_fails() {
    cmd()
        .arg("create")
        .assert()
        .code(1)
        .stderr(contains("Error: no templates supplied"));
}

#[test]
fn create_unknown_flag_is_usage_error() {
    cmd()
        .args(["create", "--unknown-argument=val"])
        .assert()
        .code(2)
        .stderr(contains("Error: unknown flag: --unknown-argument"));
}

#[test]
fn create_invalid_template_reports_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad-comid.json"), "{}").unwrap();

    cmd()
        .current_dir(dir.path())
        .args(["create", "--tmpl-file=bad-comid.json"])
        .assert()
        .code(1)
        .stderr(contains(
            "error validating template bad-comid.json: tag-identity validation failed: empty tag-id",
        ));
}
