use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::pipeline::{StageSpec, Target};
use crate::reference::{NhcValue, ReferenceEntry};
use crate::settings::SettingsSpec;

/// Platform used when a recipe declares none.
pub const LOCAL_PLATFORM: &str = "local";
/// Environment used when neither the platform nor the caller names one.
pub const DEFAULT_ENVIRONMENT: &str = "builtin";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Recipe {
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: SettingsSpec,
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformMetadata>,
    pub pipeline: Vec<StageSpec>,
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
}

/// What a recipe knows about one target system: the hardware variant it
/// belongs to, the environments it offers, exported variables and the
/// reference values its benchmarks are checked against.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlatformMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, ReferenceEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nhc_values: BTreeMap<String, NhcValue>,
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recipe file: {}", path.display()))?;
        let mut recipe: Recipe = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse recipe YAML: {}", path.display()))?;
        recipe.source_dir = Some(
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        );
        Ok(recipe)
    }

    /// Directory relative settings are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn platform_names(&self) -> Vec<String> {
        if self.platforms.is_empty() {
            vec![LOCAL_PLATFORM.to_string()]
        } else {
            self.platforms.keys().cloned().collect()
        }
    }

    /// Builds the target for `platform`. The environment defaults to the
    /// platform's first declared environment.
    pub fn target(&self, platform: &str, environment: Option<&str>) -> Result<Target> {
        let metadata = if self.platforms.is_empty() && platform == LOCAL_PLATFORM {
            PlatformMetadata::default()
        } else {
            self.platforms.get(platform).cloned().ok_or_else(|| {
                anyhow!(
                    "Unknown platform '{}'. Declared platforms: {}",
                    platform,
                    self.platform_names().join(", ")
                )
            })?
        };

        let environment = environment
            .map(str::to_string)
            .or_else(|| metadata.environments.first().cloned())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        if !metadata.environments.is_empty() && !metadata.environments.contains(&environment) {
            return Err(anyhow!(
                "Environment '{}' is not offered by platform '{}' (available: {})",
                environment,
                platform,
                metadata.environments.join(", ")
            ));
        }

        Ok(Target {
            platform: platform.to_string(),
            environment,
            variant: metadata.variant.clone(),
            metadata,
        })
    }

    /// Targets for every declared platform, each in its default environment.
    pub fn targets(&self) -> Result<Vec<Target>> {
        self.platform_names()
            .iter()
            .map(|name| self.target(name, None))
            .collect()
    }
}
