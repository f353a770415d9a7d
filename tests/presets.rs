use std::fs;

use benchstage::pipeline::{StageDefinition, StageRegistry};
use benchstage::presets::{PRESETS, generate_preset, preset};
use benchstage::recipe::Recipe;
use benchstage::reference::build_reference;
use benchstage::stages;
use benchstage::validation::validate_recipe;
use tempfile::tempdir;

fn build_registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    stages::register_defaults(&mut registry);
    registry
}

#[test]
fn every_preset_round_trips_and_validates() {
    let temp = tempdir().unwrap();
    let registry = build_registry();

    for name in PRESETS {
        let path = temp.path().join(format!("{name}.yaml"));
        let generated = generate_preset(name, &path).expect("preset generation");
        assert!(generated.exists());

        let recipe = Recipe::load(&generated).expect("preset parses back");
        assert_eq!(recipe.name.as_str(), *name);
        let report = validate_recipe(&recipe, &registry);
        assert!(report.is_ok(), "{name}: {:?}", report.errors);
        assert!(!recipe.targets().unwrap().is_empty());
    }
}

#[test]
fn stream_preset_writes_expected_stages() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("nested/stream.yaml");
    generate_preset("stream", &path).unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("stage: download"));
    assert!(contents.contains("name: stream-run"));
    assert!(contents.contains("stream_test_results.json"));
    assert!(contents.contains("hosts_file: hosts.txt"));
}

#[test]
fn stream_build_uses_zen2_flags_on_hbv3() {
    let recipe = preset("stream").unwrap();
    let registry = build_registry();
    let target = recipe.target("azure:hbv3", None).unwrap();
    assert_eq!(target.environment, "gnu-azhpc");

    let spec = recipe
        .pipeline
        .iter()
        .find(|s| s.name == "stream-build")
        .unwrap();
    let stage = registry
        .create(
            &spec.stage,
            StageDefinition {
                name: spec.name.clone(),
                params: spec.params.clone().unwrap_or_default(),
                target: target.clone(),
            },
        )
        .unwrap();

    assert_eq!(stage.config().executable_opts, vec!["-mavx2", "-arch zen2"]);
    assert!(stage.supports(&target));

    let reference = build_reference(&target.metadata, "stream_triad").unwrap();
    assert_eq!(reference.value, 330_000.0);
    assert_eq!(reference.lower, Some(-0.1));
    assert_eq!(reference.upper, Some(0.1));
}

#[test]
fn hpl_hbv2_appends_grid_edits() {
    let recipe = preset("hpl").unwrap();
    let registry = build_registry();
    let target = recipe.target("azure:hbv2", None).unwrap();
    let spec = recipe.pipeline.iter().find(|s| s.name == "hpl-run").unwrap();
    let stage = registry
        .create(
            &spec.stage,
            StageDefinition {
                name: spec.name.clone(),
                params: spec.params.clone().unwrap_or_default(),
                target,
            },
        )
        .unwrap();

    let config = stage.config();
    assert!(config.executable_opts.contains(&"-np 30".to_string()));
    assert!(config.prerun_cmds.last().unwrap().contains("Qs/g"));
    assert!(config.prerun_cmds.first().unwrap().contains("hostname"));
}

#[test]
fn unknown_preset_is_rejected() {
    let temp = tempdir().unwrap();
    let err = generate_preset("linpack", &temp.path().join("x.yaml")).unwrap_err();
    assert!(err.to_string().contains("Unknown preset 'linpack'"));
}
