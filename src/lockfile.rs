use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::pipeline::StageSpec;
use crate::recipe::Recipe;

#[derive(Debug, Serialize)]
pub struct PipelineLock {
    pub recipe: String,
    pub recipe_version: u32,
    pub generated_at: DateTime<Utc>,
    pub platforms: Vec<PlatformLock>,
    pub stages: Vec<StageLock>,
}

#[derive(Debug, Serialize)]
pub struct PlatformLock {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StageLock {
    pub name: String,
    pub kind: String,
    pub params_hash: String,
}

pub fn generate_lock(recipe: &Recipe, path: &Path) -> Result<()> {
    let stages = recipe
        .pipeline
        .iter()
        .map(|spec| StageLock {
            name: spec.name.clone(),
            kind: spec.stage.clone(),
            params_hash: hash_params(spec),
        })
        .collect();

    let platforms = recipe
        .platform_names()
        .into_iter()
        .map(|name| {
            let metadata = recipe.platforms.get(&name);
            PlatformLock {
                variant: metadata.and_then(|m| m.variant.clone()),
                environments: metadata.map(|m| m.environments.clone()).unwrap_or_default(),
                name,
            }
        })
        .collect();

    let lock = PipelineLock {
        recipe: recipe.name.clone(),
        recipe_version: recipe.version,
        generated_at: Utc::now(),
        platforms,
        stages,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create lockfile: {}", path.display()))?;
    serde_yaml::to_writer(file, &lock)
        .with_context(|| format!("Failed to write lockfile: {}", path.display()))?;

    Ok(())
}

/// SHA-256 over the stage kind and its parameters. Parameter maps keep
/// their keys sorted, so equal parameters hash equally.
pub fn hash_params(spec: &StageSpec) -> String {
    let mut hasher = Sha256::new();
    let serialized = serde_json::to_vec(&spec.params.clone().unwrap_or_default()).unwrap_or_default();
    hasher.update(spec.stage.as_bytes());
    hasher.update(serialized);
    format!("{:x}", hasher.finalize())
}
