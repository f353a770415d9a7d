use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use benchstage::hooks::{HookOutcome, HookPoint};
use benchstage::pipeline::{
    PipelineExecutor, PipelineState, StageKind, StageRegistry, StageSpec, StageStatus, Target,
    build_pipeline,
};
use benchstage::recipe::PlatformMetadata;
use benchstage::reference::{ReferenceEntry, Verdict};
use benchstage::settings::RunSettings;
use benchstage::stages;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

const TWO_NODE_LOG: &str =
    r"printf 'system: node1 stream: 12000.5\nsystem: node2 stream: 11950.0\n' > results.log";

fn build_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    stages::register_defaults(&mut registry);
    registry
}

fn stage_spec(kind: StageKind, name: &str, params: Value) -> StageSpec {
    let params = match params {
        Value::Object(map) => map,
        other => panic!("stage params must be an object, got {other}"),
    };
    StageSpec {
        stage: kind.as_str().to_string(),
        name: name.to_string(),
        params: Some(params),
    }
}

fn hosts_stage(hosts: &[&str]) -> StageSpec {
    let mut content = hosts.join("\\n");
    content.push_str("\\n");
    stage_spec(
        StageKind::Download,
        "hosts",
        json!({
            "prerun_cmds": [format!("printf '{content}' > hosts.txt")],
            "sanity": [{ "check": "files_exist", "files": ["hosts.txt"] }],
        }),
    )
}

fn stream_run_stage(command: &str) -> StageSpec {
    stage_spec(
        StageKind::Run,
        "stream-run",
        json!({
            "executable": command,
            "sanity": [{
                "check": "pattern_count",
                "pattern": r"stream: (\S+)",
                "source": "results.log",
                "expected": { "hosts_file": "hosts.txt" },
            }],
            "performance": [{
                "metric": "stream",
                "unit": "MB/s",
                "source": "results.log",
                "hosts_file": "hosts.txt",
                "export": "stream_test_results.json",
            }],
        }),
    )
}

fn referenced_target() -> Target {
    let metadata = PlatformMetadata {
        references: BTreeMap::from([(
            "stream".to_string(),
            ReferenceEntry {
                value: 12000.0,
                lower: Some(-0.1),
                upper: Some(0.1),
                unit: Some("MB/s".into()),
            },
        )]),
        ..PlatformMetadata::default()
    };
    Target::new("local", "builtin").with_metadata(metadata)
}

fn executor(temp: &TempDir, specs: &[StageSpec], target: Target) -> PipelineExecutor {
    build_pipeline(
        &build_registry(),
        "test",
        specs,
        target,
        RunSettings::rooted_at(temp.path()),
    )
    .unwrap()
}

#[test]
fn two_node_log_passes_sanity_and_extracts_both_nodes() {
    let temp = tempdir().unwrap();
    let specs = vec![
        hosts_stage(&["node1", "node2"]),
        stream_run_stage(TWO_NODE_LOG),
    ];
    let report = executor(&temp, &specs, referenced_target()).execute();

    assert_eq!(report.state, PipelineState::Reported, "{:?}", report.error);
    let values: BTreeMap<_, _> = report
        .records()
        .map(|r| (r.node.as_str(), r.value))
        .collect();
    assert_eq!(
        values,
        BTreeMap::from([("node1", 12000.5), ("node2", 11950.0)])
    );
    assert!(report.records().all(|r| r.verdict == Verdict::Pass));

    let exported = temp
        .path()
        .join("output/local/builtin/stream-run/stream_test_results.json");
    assert_eq!(
        fs::read_to_string(exported).unwrap(),
        "{\n    \"node1\": \"12000.5\",\n    \"node2\": \"11950.0\"\n}"
    );
}

#[test]
fn fewer_results_than_hosts_is_a_sanity_mismatch() {
    let temp = tempdir().unwrap();
    let specs = vec![
        hosts_stage(&["node1", "node2"]),
        stream_run_stage(r"printf 'system: node1 stream: 12000.5\n' > results.log"),
    ];
    let report = executor(&temp, &specs, referenced_target()).execute();

    assert_eq!(report.state, PipelineState::Failed);
    let run = report.stages.last().unwrap();
    assert_eq!(run.name, "stream-run");
    assert_eq!(run.status, StageStatus::Failed);
    assert_eq!(run.error_kind.as_deref(), Some("sanity_mismatch"));
    assert!(run.records.is_empty());
}

#[test]
fn unknown_platform_reports_values_unchecked() {
    let temp = tempdir().unwrap();
    let specs = vec![
        hosts_stage(&["node1", "node2"]),
        stream_run_stage(TWO_NODE_LOG),
    ];
    let report = executor(&temp, &specs, Target::new("elsewhere", "builtin")).execute();

    assert_eq!(report.state, PipelineState::Reported);
    assert_eq!(report.records().count(), 2);
    for record in report.records() {
        assert_eq!(record.verdict, Verdict::Unchecked);
        assert!(record.reference.is_none());
    }
    assert!(report.performance_failures().is_empty());
}

#[test]
fn out_of_band_value_fails_verdict_but_still_reports() {
    let temp = tempdir().unwrap();
    let specs = vec![
        hosts_stage(&["node1"]),
        stream_run_stage(r"printf 'system: node1 stream: 9000.0\n' > results.log"),
    ];
    let report = executor(&temp, &specs, referenced_target()).execute();

    assert_eq!(report.state, PipelineState::Reported);
    let failures = report.performance_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].node, "node1");
}

#[test]
fn failed_stage_halts_the_chain() {
    let temp = tempdir().unwrap();
    let specs = vec![
        stage_spec(
            StageKind::Download,
            "fetch",
            json!({
                "executable": "true",
                "expected_artifacts": ["stream.c"],
            }),
        ),
        stage_spec(
            StageKind::Build,
            "compile",
            json!({ "executable": "touch stream" }),
        ),
    ];
    let executor = executor(&temp, &specs, Target::new("local", "builtin"));
    let report = executor.execute();

    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(report.stages.len(), 1);
    assert_eq!(report.stages[0].error_kind.as_deref(), Some("artifact_missing"));
    assert!(!executor.stage_dir("compile").exists());
    assert_eq!(executor.metrics().snapshot().sanity_failures, 1);
}

#[test]
fn nonzero_exit_does_not_gate_the_stage() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Download,
        "fetch",
        json!({
            "executable": "touch stream.c",
            "postrun_cmds": ["false"],
            "expected_artifacts": ["stream.c"],
        }),
    )];
    let report = executor(&temp, &specs, Target::new("local", "builtin")).execute();

    assert_eq!(report.state, PipelineState::Reported);
    assert_eq!(report.stages[0].exit_code, Some(1));
}

#[test]
fn later_stages_see_the_previous_output() {
    let temp = tempdir().unwrap();
    let specs = vec![
        stage_spec(
            StageKind::Download,
            "fetch",
            json!({ "executable": "echo source > stream.c" }),
        ),
        stage_spec(
            StageKind::Build,
            "compile",
            json!({
                "executable": "cp stream.c stream",
                "expected_artifacts": ["stream"],
            }),
        ),
        stage_spec(
            StageKind::Run,
            "isolated",
            json!({
                "inherit_input": false,
                "executable": "test ! -e stream && echo clean",
                "sanity": [{ "check": "pattern_found", "pattern": "(?m)^clean$" }],
            }),
        ),
    ];
    let executor = executor(&temp, &specs, Target::new("local", "builtin"));
    let report = executor.execute();

    assert_eq!(report.state, PipelineState::Reported, "{:?}", report.error);
    assert_eq!(
        fs::read_to_string(executor.stage_dir("compile").join("stream")).unwrap(),
        "source\n"
    );
    // Stage directories stay with the stage that produced them.
    assert!(executor.stage_dir("fetch").join("stream.c").is_file());
    assert!(!executor.stage_dir("fetch").join("stream").exists());
}

#[test]
fn cached_build_is_short_circuited_with_identical_bytes() {
    let temp = tempdir().unwrap();
    let settings = RunSettings::rooted_at(temp.path());
    let entry = settings.cache_root.join("local/builtin/hpl-build");
    fs::create_dir_all(entry.join("bin")).unwrap();
    let cached_bytes: Vec<u8> = (0u8..=255).collect();
    fs::write(entry.join("xhpl"), &cached_bytes).unwrap();
    fs::write(entry.join("bin/helper"), b"helper").unwrap();

    let specs = vec![stage_spec(
        StageKind::Build,
        "hpl-build",
        json!({
            "executable": "printf rebuilt > xhpl",
            "expected_artifacts": ["xhpl"],
            "cache": { "marker": "xhpl", "on_hit_cmds": ["echo 'already ran'"] },
        }),
    )];
    let executor = build_pipeline(
        &build_registry(),
        "hpl",
        &specs,
        Target::new("local", "builtin"),
        settings,
    )
    .unwrap();
    let report = executor.execute();

    assert_eq!(report.state, PipelineState::Reported, "{:?}", report.error);
    assert_eq!(report.stages[0].status, StageStatus::Cached);
    let workdir = executor.stage_dir("hpl-build");
    assert_eq!(fs::read(workdir.join("xhpl")).unwrap(), cached_bytes);
    assert_eq!(fs::read(workdir.join("bin/helper")).unwrap(), b"helper");
    assert_eq!(
        fs::read_to_string(workdir.join("hpl-build.out")).unwrap(),
        "already ran\n"
    );
    assert_eq!(executor.metrics().snapshot().cache_hits, 1);
}

#[test]
fn cache_miss_publishes_after_sanity_and_hits_next_time() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Download,
        "hpl-download",
        json!({
            "executable": "printf '#!/bin/sh\\n' > hpl_build_script.sh",
            "sanity": [{ "check": "files_exist", "files": ["hpl_build_script.sh"] }],
            "cache": { "marker": "hpl_build_script.sh" },
        }),
    )];

    let first = executor(&temp, &specs, Target::new("local", "builtin"));
    let report = first.execute();
    assert_eq!(report.stages[0].status, StageStatus::Passed);
    let marker = first
        .cache()
        .entry_dir("local", "builtin", "hpl-download")
        .join("hpl_build_script.sh");
    assert!(marker.is_file());

    let second = executor(&temp, &specs, Target::new("local", "builtin"));
    let report = second.execute();
    assert_eq!(report.stages[0].status, StageStatus::Cached);
}

#[test]
fn failing_sanity_does_not_publish_to_cache() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Build,
        "hpl-build",
        json!({
            "executable": "touch xhpl",
            "sanity": [{ "check": "pattern_found", "pattern": "BUILD OK" }],
            "cache": { "marker": "xhpl" },
        }),
    )];
    let executor = executor(&temp, &specs, Target::new("local", "builtin"));
    let report = executor.execute();

    assert_eq!(report.state, PipelineState::Failed);
    assert!(
        !executor
            .cache()
            .entry_dir("local", "builtin", "hpl-build")
            .exists()
    );
}

#[test]
fn hooks_run_in_registration_order() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Run,
        "bench",
        json!({ "executable": "echo ran" }),
    )];
    let mut executor = executor(&temp, &specs, Target::new("local", "builtin"));
    let calls = Arc::new(Mutex::new(Vec::new()));
    for (point, label) in [
        (HookPoint::BeforePerformance, "before_performance"),
        (HookPoint::AfterInit, "after_init"),
        (HookPoint::AfterRun, "after_run"),
        (HookPoint::BeforeRun, "before_run"),
    ] {
        let calls = calls.clone();
        executor.register_hook(point, label, move |ctx| {
            let seen_log = ctx
                .stage
                .as_ref()
                .and_then(|s| s.log)
                .map(|log| log.stdout.trim().to_string());
            calls.lock().unwrap().push((label, seen_log));
            Ok(HookOutcome::Continue)
        });
    }

    let report = executor.execute();
    assert_eq!(report.state, PipelineState::Reported);
    let calls = calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            ("after_init", None),
            ("before_run", None),
            ("after_run", Some("ran".to_string())),
            ("before_performance", Some("ran".to_string())),
        ]
    );
}

#[test]
fn failing_after_init_hook_fails_before_any_stage() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Run,
        "bench",
        json!({ "executable": "echo ran" }),
    )];
    let mut executor = executor(&temp, &specs, Target::new("local", "builtin"));
    executor.register_hook(HookPoint::AfterInit, "require-module", |_| {
        Err(anyhow!("module system unavailable"))
    });

    let report = executor.execute();
    assert_eq!(report.state, PipelineState::Failed);
    assert!(report.stages.is_empty());
    assert!(
        report
            .error
            .as_deref()
            .unwrap()
            .contains("module system unavailable")
    );
}

#[test]
fn variant_overrides_are_applied_per_target() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Build,
        "stream-build",
        json!({
            "executable": "echo",
            "executable_opts": ["generic"],
            "variants": { "hbrs_v3": { "executable_opts": ["-mavx2", "{variant}"] } },
            "sanity": [{ "check": "pattern_found", "pattern": "-mavx2 hbrs_v3" }],
        }),
    )];
    let target = Target::new("azure:hbv3", "gnu-azhpc").with_metadata(PlatformMetadata {
        variant: Some("hbrs_v3".into()),
        ..PlatformMetadata::default()
    });
    let executor = executor(&temp, &specs, target);
    let report = executor.execute();

    assert_eq!(report.state, PipelineState::Reported, "{:?}", report.error);
    assert!(
        executor
            .stage_dir("stream-build")
            .starts_with(temp.path().join("stage/azure_hbv3/gnu-azhpc"))
    );
}

#[test]
fn duplicate_stage_names_are_rejected() {
    let temp = tempdir().unwrap();
    let specs = vec![
        stage_spec(StageKind::Download, "fetch", json!({})),
        stage_spec(StageKind::Build, "fetch", json!({})),
    ];
    let result = build_pipeline(
        &build_registry(),
        "dup",
        &specs,
        Target::new("local", "builtin"),
        RunSettings::rooted_at(temp.path()),
    );
    assert!(result.is_err());
}

#[test]
fn stage_names_with_separators_keep_files_in_the_stage_dir() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Download,
        "gridtools/download",
        json!({
            "executable": "echo hi",
            "sanity": [{ "check": "pattern_found", "pattern": "hi" }],
        }),
    )];
    let executor = executor(&temp, &specs, Target::new("local", "builtin"));
    let report = executor.execute();

    assert_eq!(report.state, PipelineState::Reported, "{:?}", report.error);
    let workdir = executor.stage_dir("gridtools/download");
    assert!(workdir.ends_with("local/builtin/gridtools_download"));
    assert!(workdir.join("gridtools_download.sh").is_file());
    assert_eq!(
        fs::read_to_string(workdir.join("gridtools_download.out")).unwrap(),
        "hi\n"
    );
}

#[test]
fn stages_sharing_a_working_directory_are_rejected() {
    let temp = tempdir().unwrap();
    let specs = vec![
        stage_spec(StageKind::Download, "a/b", json!({})),
        stage_spec(StageKind::Build, "a_b", json!({})),
    ];
    let err = build_pipeline(
        &build_registry(),
        "clash",
        &specs,
        Target::new("local", "builtin"),
        RunSettings::rooted_at(temp.path()),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("share a working directory"));
}

#[test]
fn skipping_hooks_outside_the_cache_are_not_cache_hits() {
    let temp = tempdir().unwrap();
    let specs = vec![stage_spec(
        StageKind::Run,
        "bench",
        json!({ "executable": "echo ran" }),
    )];
    let mut executor = executor(&temp, &specs, Target::new("local", "builtin"));
    executor.register_hook(HookPoint::BeforeRun, "dry-replacement", |_| {
        Ok(HookOutcome::Skip {
            replacement: vec!["echo replaced".into()],
        })
    });

    let report = executor.execute();
    assert_eq!(report.state, PipelineState::Reported, "{:?}", report.error);
    assert_eq!(
        fs::read_to_string(executor.stage_dir("bench").join("bench.out")).unwrap(),
        "replaced\n"
    );
    assert_eq!(executor.metrics().snapshot().cache_hits, 0);
}
