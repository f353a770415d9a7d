use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cache::path_component;
use crate::pipeline::{StageDefinition, StageKind, StageRegistry, StageSpec, Target};
use crate::recipe::Recipe;
use crate::reference::build_reference;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_recipe(recipe: &Recipe, registry: &StageRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    if recipe.version != 1 {
        report
            .errors
            .push(format!("Unsupported recipe version: {}", recipe.version));
    }

    if recipe.name.trim().is_empty() {
        report.errors.push("Recipe name cannot be empty".into());
    }

    if recipe.pipeline.is_empty() {
        report
            .errors
            .push("Pipeline must contain at least one stage".into());
    }

    let targets = match recipe.targets() {
        Ok(targets) => targets,
        Err(err) => {
            report.errors.push(format!("{err:#}"));
            Vec::new()
        }
    };

    let mut names = BTreeSet::new();
    let mut dirs = BTreeMap::new();
    for (idx, stage) in recipe.pipeline.iter().enumerate() {
        if stage.name.trim().is_empty() {
            report
                .errors
                .push(format!("Stage {} ('{}') has an empty name", idx + 1, stage.stage));
        } else if !names.insert(stage.name.as_str()) {
            report
                .errors
                .push(format!("Duplicate stage name '{}'", stage.name));
        } else if let Some(other) = dirs.insert(path_component(&stage.name), stage.name.as_str()) {
            report.errors.push(format!(
                "Stages '{other}' and '{}' would share a working directory",
                stage.name
            ));
        }
        report.merge(validate_stage_order(idx, stage));
        for target in &targets {
            report.merge(
                validate_stage(stage, registry, target)
                    .with_context(|| format!("Stage {} ('{}')", idx + 1, stage.name))
                    .unwrap_or_else(|err| ValidationReport {
                        errors: vec![format!("{err:#}")],
                        warnings: vec![],
                    }),
            );
        }
    }

    let mut seen = BTreeSet::new();
    report.warnings.retain(|w| seen.insert(w.clone()));
    report
}

fn validate_stage(
    stage: &StageSpec,
    registry: &StageRegistry,
    target: &Target,
) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    let definition = StageDefinition {
        name: stage.name.clone(),
        params: stage.params.clone().unwrap_or_default(),
        target: target.clone(),
    };
    let instance = registry
        .create(&stage.stage, definition)
        .with_context(|| format!("Failed to instantiate stage for platform '{}'", target.platform))?;

    if !instance.supports(target) {
        report.warnings.push(format!(
            "Stage '{}' is not valid for platform '{}' in environment '{}'; the pipeline will be skipped there",
            stage.name, target.platform, target.environment
        ));
    }

    let config = instance.config();
    let reference_keys: Vec<&str> = instance
        .metrics()
        .iter()
        .map(|gate| gate.spec().reference_key())
        .collect();
    for key in reference_keys {
        if let Some(entry) = build_reference(&target.metadata, key) {
            entry.validate(key).with_context(|| {
                format!("Invalid reference on platform '{}'", target.platform)
            })?;
        }
    }

    if instance.kind() == StageKind::Run && config.performance.is_empty() {
        report.warnings.push(format!(
            "Run stage '{}' declares no performance values",
            stage.name
        ));
    }
    if instance.kind() == StageKind::Run && config.cache.is_some() {
        report.warnings.push(format!(
            "Run stage '{}' is cached; benchmark results will be reused instead of measured",
            stage.name
        ));
    }

    Ok(report)
}

fn validate_stage_order(idx: usize, stage: &StageSpec) -> ValidationReport {
    let mut report = ValidationReport::default();
    let inherit = stage
        .params
        .as_ref()
        .and_then(|p| p.get("inherit_input"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    if idx > 0 && !inherit {
        report.warnings.push(format!(
            "Stage '{}' does not inherit the previous stage's output",
            stage.name
        ));
    }
    if idx == 0 && stage.stage == StageKind::Run.as_str() {
        report.warnings.push(format!(
            "Pipeline starts with run stage '{}'; nothing is downloaded or built first",
            stage.name
        ));
    }
    report
}
