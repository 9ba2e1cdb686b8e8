//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against a throwaway home
//! directory and verify outputs.

mod common;

use common::{parse_json, run_cli_failure, run_cli_success};

#[test]
fn test_status_json_defaults() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["status", "--json"]);
    let state = parse_json(&out);
    assert_eq!(state["enabled"], true);
    assert_eq!(state["schedule"]["type"], "fixed");
    assert_eq!(state["schedule"]["sleep_start"], "22:00");
    assert_eq!(state["schedule"]["sleep_end"], "07:00");
}

#[test]
fn test_schedule_fixed_persists() {
    let home = tempfile::tempdir().unwrap();
    run_cli_success(
        home.path(),
        &["schedule", "fixed", "23:30", "06:15", "--timezone", "Europe/Berlin"],
    );
    let schedule = parse_json(&run_cli_success(home.path(), &["schedule", "show"]));
    assert_eq!(schedule["sleep_start"], "23:30");
    assert_eq!(schedule["sleep_end"], "06:15");
    assert_eq!(schedule["timezone"], "Europe/Berlin");
}

#[test]
fn test_schedule_rejects_bad_latitude() {
    let home = tempfile::tempdir().unwrap();
    let stderr = run_cli_failure(home.path(), &["schedule", "solar", "95", "10"]);
    assert!(stderr.contains("latitude"), "stderr: {stderr}");

    let schedule = parse_json(&run_cli_success(home.path(), &["schedule", "show"]));
    assert_eq!(schedule["type"], "fixed");
}

#[test]
fn test_override_toggle_round_trip() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["override", "toggle", "news.example.org"]);
    assert!(out.contains("calm mode off for news.example.org"));

    let list = parse_json(&run_cli_success(home.path(), &["override", "list", "--json"]));
    assert_eq!(list["news.example.org"]["enabled"], false);

    let out = run_cli_success(home.path(), &["override", "toggle", "news.example.org"]);
    assert!(out.contains("override removed"));
}

#[test]
fn test_override_allow_rejects_unknown_rule() {
    let home = tempfile::tempdir().unwrap();
    let stderr = run_cli_failure(home.path(), &["override", "allow", "a.example", "no-such-rule"]);
    assert!(stderr.contains("unknown rule id"));
}

#[test]
fn test_rules_toggle() {
    let home = tempfile::tempdir().unwrap();
    let out = run_cli_success(home.path(), &["rules", "toggle", "thumbnail-dimming"]);
    assert!(out.contains("thumbnail-dimming disabled"));

    let rows = parse_json(&run_cli_success(home.path(), &["rules", "list", "--json"]));
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    let dimming = rows
        .iter()
        .find(|r| r["id"] == "thumbnail-dimming")
        .unwrap();
    assert_eq!(dimming["enabled"], false);
}

#[test]
fn test_config_get_set() {
    let home = tempfile::tempdir().unwrap();
    assert_eq!(
        run_cli_success(home.path(), &["config", "get", "enabled"]).trim(),
        "true"
    );
    run_cli_success(home.path(), &["config", "set", "enabled", "false"]);
    assert_eq!(
        run_cli_success(home.path(), &["config", "get", "enabled"]).trim(),
        "false"
    );
    run_cli_failure(home.path(), &["config", "get", "no_such_key"]);
}

#[test]
fn test_simulate_forced_calm_applies_and_restores() {
    let home = tempfile::tempdir().unwrap();
    let report = parse_json(&run_cli_success(
        home.path(),
        &["simulate", "--calm", "--json", "--url", "https://video.example.com/"],
    ));
    assert_eq!(report["calm_active"], true);
    assert_eq!(report["applied_rules"].as_array().unwrap().len(), 4);
    assert_eq!(report["restored"], true);
}

#[test]
fn test_simulate_respects_the_schedule() {
    let home = tempfile::tempdir().unwrap();
    run_cli_success(
        home.path(),
        &["schedule", "fixed", "22:00", "07:00", "--timezone", "UTC"],
    );
    let report = parse_json(&run_cli_success(
        home.path(),
        &["simulate", "--json", "--at", "2024-06-01T12:00:00Z"],
    ));
    assert_eq!(report["calm_active"], false);
    assert!(report["applied_rules"].as_array().unwrap().is_empty());

    let report = parse_json(&run_cli_success(
        home.path(),
        &["simulate", "--json", "--at", "2024-06-01T23:00:00Z"],
    ));
    assert_eq!(report["calm_active"], true);
}
