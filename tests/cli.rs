use std::fs;
use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn bench_recipe(value: &str) -> String {
    format!(
        r#"
version: 1
name: tiny
platforms:
  local:
    references:
      stream:
        value: 12000
        lower: -0.1
        upper: 0.1
        unit: MB/s
pipeline:
  - stage: download
    name: fetch
    params:
      prerun_cmds: ["echo data > input.txt"]
      sanity:
        - check: files_exist
          files: [input.txt]
  - stage: run
    name: bench
    params:
      executable: echo
      executable_opts: ["'system: node1 stream: {value}'"]
      sanity:
        - check: pattern_found
          pattern: "stream: "
      performance:
        - metric: stream
          unit: MB/s
          export: results.json
"#
    )
}

fn benchstage() -> Command {
    let mut cmd = Command::cargo_bin("benchstage").unwrap();
    for var in [
        "BENCHSTAGE_STAGE_ROOT",
        "BENCHSTAGE_OUTPUT_ROOT",
        "BENCHSTAGE_CACHE_ROOT",
        "BENCHSTAGE_SHELL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn run_in(root: &Path, recipe: &Path) -> Command {
    let mut cmd = benchstage();
    cmd.arg("run")
        .arg(recipe)
        .arg("--stage-root")
        .arg(root.join("stage"))
        .arg("--output-root")
        .arg(root.join("output"))
        .arg("--cache-root")
        .arg(root.join("repo"));
    cmd
}

#[test]
fn list_stages_names_every_kind() {
    let output = benchstage().arg("list-stages").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("- build:"));
    assert!(stdout.contains("- download:"));
    assert!(stdout.contains("- run:"));
}

#[test]
fn preset_is_generated_validated_and_locked() {
    let temp = tempdir().unwrap();
    let recipe = temp.path().join("stream.yaml");
    let lock = temp.path().join("stream.lock");

    benchstage()
        .args(["recipe", "new", "--preset", "stream", "--output"])
        .arg(&recipe)
        .assert()
        .success();
    assert!(recipe.exists());

    benchstage().arg("validate").arg(&recipe).assert().success();

    benchstage()
        .arg("lock")
        .arg(&recipe)
        .arg(&lock)
        .assert()
        .success();
    let content = fs::read_to_string(&lock).unwrap();
    assert!(content.contains("recipe: stream"));
    assert!(content.contains("name: azure:hbv3"));
}

#[test]
fn validate_rejects_unknown_stage_kind() {
    let temp = tempdir().unwrap();
    let recipe = temp.path().join("bad.yaml");
    fs::write(
        &recipe,
        "version: 1\nname: bad\npipeline:\n  - stage: compile\n    name: make\n",
    )
    .unwrap();

    benchstage().arg("validate").arg(&recipe).assert().failure();
}

#[test]
fn run_reports_and_exports_results() {
    let temp = tempdir().unwrap();
    let recipe = temp.path().join("tiny.yaml");
    fs::write(&recipe, bench_recipe("12100.5")).unwrap();
    let report = temp.path().join("reports/run.json");
    let metrics = temp.path().join("metrics.json");

    let output = run_in(temp.path(), &recipe)
        .arg("--report")
        .arg(&report)
        .arg("--metrics-json")
        .arg(&metrics)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{stdout}");
    assert!(stdout.contains("[PASSED] local bench (run)"));
    assert!(stdout.contains("node1 stream: 12100.5 MB/s"));
    assert!(stdout.contains("local: REPORTED"));

    let reports: Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(reports[0]["state"], "reported");
    assert_eq!(reports[0]["stages"].as_array().unwrap().len(), 2);

    let exported = temp.path().join("output/local/builtin/bench/results.json");
    let document: Value = serde_json::from_str(&fs::read_to_string(exported).unwrap()).unwrap();
    assert_eq!(document["node1"], "12100.5");

    let snapshot: Value = serde_json::from_str(&fs::read_to_string(&metrics).unwrap()).unwrap();
    assert_eq!(snapshot["stages"].as_object().unwrap().len(), 2);
    assert_eq!(snapshot["pipelines"], 1);
    assert_eq!(snapshot["performance_passes"], 1);

    // The download stage's output is carried into the run stage.
    assert!(temp.path().join("stage/local/builtin/bench/input.txt").is_file());
}

#[test]
fn performance_failure_sets_exit_status() {
    let temp = tempdir().unwrap();
    let recipe = temp.path().join("tiny.yaml");
    fs::write(&recipe, bench_recipe("9000")).unwrap();

    run_in(temp.path(), &recipe).assert().failure();
    run_in(temp.path(), &recipe)
        .arg("--allow-performance-failures")
        .assert()
        .success();
}

#[test]
fn failing_stage_fails_the_run() {
    let temp = tempdir().unwrap();
    let recipe = temp.path().join("broken.yaml");
    fs::write(
        &recipe,
        r#"
version: 1
name: broken
pipeline:
  - stage: build
    name: compile
    params:
      executable: "true"
      expected_artifacts: [a.out]
  - stage: run
    name: bench
    params:
      executable: echo never
"#,
    )
    .unwrap();
    let report = temp.path().join("report.json");

    run_in(temp.path(), &recipe)
        .arg("--report")
        .arg(&report)
        .assert()
        .failure();

    let reports: Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(reports[0]["state"], "failed");
    assert_eq!(reports[0]["stages"].as_array().unwrap().len(), 1);
    assert_eq!(reports[0]["stages"][0]["error_kind"], "artifact_missing");
}

#[test]
fn dry_run_lists_stage_directories() {
    let temp = tempdir().unwrap();
    let recipe = temp.path().join("tiny.yaml");
    fs::write(&recipe, bench_recipe("12000")).unwrap();

    let output = run_in(temp.path(), &recipe).arg("--dry-run").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("local\tdownload\tfetch\t"));
    assert!(stdout.contains("local\trun\tbench\t"));
    assert!(!temp.path().join("stage/local/builtin/fetch").exists());
}
