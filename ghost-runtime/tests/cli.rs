use std::{path::PathBuf, process::Command};

const SETTINGS: &str = r#"{"problem_id":"noisy_quadratic","difficulty":[3,0]}"#;

fn runtime() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ghost-runtime"))
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ghost-runtime-{}-{}", std::process::id(), name))
}

#[test]
fn test_run_then_verify_json() {
    let path = temp_path("output.json");
    let status = runtime()
        .args(["run", SETTINGS, "rand_hash", "7", "--output"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success());

    let output = runtime()
        .args(["verify", SETTINGS, "rand_hash", "7"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    // a different nonce is rejected
    let status = runtime()
        .args(["verify", SETTINGS, "rand_hash", "8"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(!status.success());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_run_then_verify_compressed() {
    let path = temp_path("output.zlib");
    let status = runtime()
        .args(["run", SETTINGS, "rand_hash", "3", "--compress", "--output"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success());

    let status = runtime()
        .args(["verify", SETTINGS, "rand_hash", "3"])
        .arg(&path)
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_stdout_output_is_json() {
    let output = runtime()
        .args(["run", SETTINGS, "rand_hash", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["nonce"], 1);
    assert_eq!(value["settings"]["problem_id"], "noisy_quadratic");
    assert_eq!(value["params"][0]["shape"], serde_json::json!([3]));
    assert_eq!(value["trajectory"]["objective"].as_array().unwrap().len(), 500);
}

#[test]
fn test_unknown_problem() {
    let output = runtime()
        .args([
            "run",
            r#"{"problem_id":"knapsack","difficulty":[1]}"#,
            "rand_hash",
            "0",
        ])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unsupported problem 'knapsack'"));
}

#[test]
fn test_invalid_difficulty() {
    let status = runtime()
        .args([
            "run",
            r#"{"problem_id":"fair_regression","difficulty":[3]}"#,
            "rand_hash",
            "0",
        ])
        .status()
        .unwrap();
    assert!(!status.success());
}
