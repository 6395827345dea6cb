use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("lifeline_cli_{}", std::process::id()))
}

/// The `lifeline` binary with device-related environment cleared.
fn lifeline() -> Command {
    let mut cmd = Command::cargo_bin("lifeline").unwrap();
    cmd.env_remove("LIFELINE_SERIAL")
        .env_remove("LIFELINE_CONFIG")
        .env_remove("RUST_LOG")
        .env("LIFELINE_ARTIFACTS", scratch_dir());
    cmd
}

#[test]
fn test_help_exits_zero() {
    lifeline()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("lifeline"))
        .stdout(predicate::str::contains("check-log"));
}

#[test]
fn test_list_shows_builtin_scenarios() {
    let assert = lifeline().arg("list").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for name in [
        "just_launch",
        "launch_and_monkey",
        "launch_and_back",
        "home_and_resume",
        "home_and_start",
        "launch_second",
        "home_and_launch_second",
        "launch_a_b_a",
    ] {
        assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
    }
}

#[test]
fn test_list_json() {
    let assert = lifeline().args(["list", "--format", "json"]).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let scenarios = parsed.as_array().unwrap();
    assert_eq!(scenarios.len(), 8);
    let last_step = scenarios[0]["steps"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(last_step["type"], "CheckForCrash");
}

#[test]
fn test_check_log_clean() {
    lifeline()
        .args(["check-log", fixture_path("clean_logcat.txt").to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No failure"));
}

#[test]
fn test_check_log_native_crash_wins_over_anr() {
    lifeline()
        .args(["check-log", fixture_path("native_crash_logcat.txt").to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Native crash backtrace"))
        .stdout(predicate::str::contains("line 3:"))
        .stderr(predicate::str::contains("Test failed"));
}

#[test]
fn test_check_log_java_exception() {
    lifeline()
        .args(["check-log", fixture_path("java_exception_logcat.txt").to_str().unwrap()])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Java exception"));
}

#[test]
fn test_check_log_anr_json() {
    let assert = lifeline()
        .args([
            "check-log",
            fixture_path("anr_logcat.txt").to_str().unwrap(),
            "--format",
            "json",
        ])
        .assert()
        .code(1);
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(parsed["kind"], "ApplicationNotResponding");
    assert_eq!(parsed["failure"], true);
    assert_eq!(parsed["line"], 2);
}

#[test]
fn test_check_log_missing_file() {
    lifeline()
        .args(["check-log", "/nonexistent/logcat.txt"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_run_unknown_scenario_is_usage_error() {
    lifeline()
        .args(["run", "no_such_scenario"])
        .env("LIFELINE_ADB_PATH", "false")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown scenario"));
}

#[test]
fn test_run_without_selection_is_usage_error() {
    lifeline()
        .arg("run")
        .env("LIFELINE_ADB_PATH", "false")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_run_all_conflicts_with_names() {
    lifeline()
        .args(["run", "--all", "launch_and_back"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_run_missing_config_is_usage_error() {
    lifeline()
        .args(["--config", "/nonexistent/lifeline.json", "run", "--all"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("cannot read config"));
}

#[cfg(unix)]
#[test]
fn test_run_skips_without_device() {
    lifeline()
        .args(["run", "--all"])
        .env("LIFELINE_ADB_PATH", "false")
        .assert()
        .success()
        .stderr(predicate::str::contains("No device available"))
        .stderr(predicate::str::contains("skipping 8 scenario(s)"));
}

#[cfg(unix)]
#[test]
fn test_run_file_skips_without_device() {
    lifeline()
        .args(["run", "--file", fixture_path("scenarios.json").to_str().unwrap()])
        .env("LIFELINE_ADB_PATH", "false")
        .assert()
        .success()
        .stderr(predicate::str::contains("skipping 1 scenario(s)"));
}

#[cfg(unix)]
#[test]
fn test_run_require_device_fails_without_device() {
    lifeline()
        .args(["run", "launch_and_back", "--require-device"])
        .env("LIFELINE_ADB_PATH", "false")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no device available"));
}

#[cfg(unix)]
#[test]
fn test_device_info_without_device() {
    lifeline()
        .arg("device-info")
        .env("LIFELINE_ADB_PATH", "false")
        .assert()
        .code(2);
}

#[test]
fn test_init_config_writes_once() {
    let path = scratch_dir().join(format!("config_{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);

    lifeline()
        .args(["--config", path.to_str().unwrap(), "--serial", "emulator-5554", "init-config"])
        .assert()
        .success();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["serial"], "emulator-5554");
    assert_eq!(written["ndk_version"], "26.3.11579264");

    lifeline()
        .args(["--config", path.to_str().unwrap(), "init-config"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--force"));

    lifeline()
        .args(["--config", path.to_str().unwrap(), "init-config", "--force"])
        .assert()
        .success();

    let _ = std::fs::remove_file(&path);
}
