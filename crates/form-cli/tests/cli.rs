use std::path::PathBuf;

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../form-spec/tests/fixtures")
        .join(name)
}

fn calc_forms() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_calc-forms"));
    cmd.env_remove("CALC_FORMS_LOG");
    cmd
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn validate_accepts_complete_answers() {
    let temp = TempDir::new().expect("temp dir");
    let answers = temp.child("answers.json");
    answers
        .write_str(r#"{ "country": "CA", "age": 50, "weight_kg": 70, "height_cm": 172 }"#)
        .expect("write answers");

    let assert = calc_forms()
        .args(["validate", "--spec"])
        .arg(fixture("intake_form.json"))
        .arg("--answers")
        .arg(answers.path())
        .assert()
        .success();
    assert!(stdout_of(assert.get_output()).contains("Validation result: valid"));
}

#[test]
fn validate_reports_errors_and_fails() {
    let temp = TempDir::new().expect("temp dir");
    let answers = temp.child("answers.json");
    answers
        .write_str(r#"{ "country": "US", "age": 200, "weight_kg": 70, "height_cm": 172 }"#)
        .expect("write answers");

    let assert = calc_forms()
        .args(["validate", "--spec"])
        .arg(fixture("intake_form.json"))
        .arg("--answers")
        .arg(answers.path())
        .assert()
        .failure();
    let stdout = stdout_of(assert.get_output());
    assert!(stdout.contains("Validation result: invalid"));
    assert!(stdout.contains("age - value above maximum"));
    assert!(stdout.contains("Missing required answers: state"));
}

#[test]
fn render_shows_the_requested_page() {
    let temp = TempDir::new().expect("temp dir");
    let answers = temp.child("answers.json");
    answers
        .write_str(r#"{ "country": "US", "age": 41, "state": "WA" }"#)
        .expect("write answers");

    let assert = calc_forms()
        .args(["render", "--page", "2", "--spec"])
        .arg(fixture("intake_form.json"))
        .arg("--answers")
        .arg(answers.path())
        .assert()
        .success();
    let stdout = stdout_of(assert.get_output());
    assert!(stdout.contains("Page 2/3"));
    assert!(stdout.contains(" - state (State) [required] = WA"));
}

#[test]
fn render_card_emits_adaptive_card_json() {
    let assert = calc_forms()
        .args(["render", "--format", "card", "--spec"])
        .arg(fixture("tabbed_form.json"))
        .assert()
        .success();
    let card: serde_json::Value =
        serde_json::from_str(&stdout_of(assert.get_output())).expect("card json");
    assert_eq!(card["type"], "AdaptiveCard");
}

#[test]
fn schema_describes_form_specs() {
    let assert = calc_forms().arg("schema").assert().success();
    let schema: serde_json::Value =
        serde_json::from_str(&stdout_of(assert.get_output())).expect("schema json");
    assert!(schema["properties"]["fields"].is_object());
}

#[test]
fn wizard_walks_tabs_and_submits() {
    let assert = calc_forms()
        .args(["wizard", "--answers-json", "--spec"])
        .arg(fixture("tabbed_form.json"))
        .write_stdin("\n\nmaybe\n0.8\n")
        .assert()
        .success();
    let stdout = stdout_of(assert.get_output());
    assert!(stdout.contains("Form: Sample Size"));
    assert!(stdout.contains("Tab 2/2: power"));
    assert!(stdout.contains("Done ✅"));
    assert!(stdout.contains("Answers (CBOR hex): "));
    assert!(stdout.contains("\"power\": 0.8"));
}

#[test]
fn wizard_resumes_from_a_draft() {
    let temp = TempDir::new().expect("temp dir");
    let drafts = temp.child("drafts");

    calc_forms()
        .args(["wizard", "--spec"])
        .arg(fixture("tabbed_form.json"))
        .arg("--draft-dir")
        .arg(drafts.path())
        .write_stdin("\n\n")
        .assert()
        .failure();
    let draft = drafts.child("sample-size-draft.json");
    let saved = std::fs::read_to_string(draft.path()).expect("draft written");
    assert!(saved.contains("\"currentPage\":2"));

    let assert = calc_forms()
        .args(["wizard", "--spec"])
        .arg(fixture("tabbed_form.json"))
        .arg("--draft-dir")
        .arg(drafts.path())
        .write_stdin("0.8\n")
        .assert()
        .success();
    let stdout = stdout_of(assert.get_output());
    assert!(stdout.contains("Tab 2/2: power"));
    assert!(!stdout.contains("Tab 1/2"));
    assert!(!draft.path().exists(), "submitting clears the draft");
}
