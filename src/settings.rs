use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const STAGE_ROOT_ENV: &str = "BENCHSTAGE_STAGE_ROOT";
pub const OUTPUT_ROOT_ENV: &str = "BENCHSTAGE_OUTPUT_ROOT";
pub const CACHE_ROOT_ENV: &str = "BENCHSTAGE_CACHE_ROOT";
pub const SHELL_ENV: &str = "BENCHSTAGE_SHELL";

/// Directory and shell settings as written in a recipe. Every field is
/// optional; see [`RunSettings::resolve`] for precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub stage_root: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSettings {
    /// Per-stage working directories.
    pub stage_root: PathBuf,
    /// Exported results documents.
    pub output_root: PathBuf,
    /// Persistent artifact cache; survives between runs.
    pub cache_root: PathBuf,
    pub shell: String,
}

impl RunSettings {
    /// Resolves settings with precedence: override > environment variable >
    /// recipe > default. Relative recipe paths are taken relative to
    /// `base_dir` (the recipe's directory); overrides and environment values
    /// are used as given.
    pub fn resolve(spec: &SettingsSpec, base_dir: &Path, overrides: SettingsOverrides) -> Self {
        let dir = |flag: Option<PathBuf>, var: &str, recipe: &Option<PathBuf>, default: &str| {
            flag.or_else(|| env::var_os(var).map(PathBuf::from))
                .unwrap_or_else(|| {
                    let configured = recipe.clone().unwrap_or_else(|| PathBuf::from(default));
                    if configured.is_absolute() {
                        configured
                    } else {
                        base_dir.join(configured)
                    }
                })
        };

        Self {
            stage_root: dir(
                overrides.stage_root,
                STAGE_ROOT_ENV,
                &spec.stage_root,
                "stage",
            ),
            output_root: dir(
                overrides.output_root,
                OUTPUT_ROOT_ENV,
                &spec.output_root,
                "output",
            ),
            cache_root: dir(
                overrides.cache_root,
                CACHE_ROOT_ENV,
                &spec.cache_root,
                "repo",
            ),
            shell: overrides
                .shell
                .or_else(|| env::var(SHELL_ENV).ok())
                .or_else(|| spec.shell.clone())
                .unwrap_or_else(|| "bash".to_string()),
        }
    }

    /// Settings rooted in one directory, without consulting the environment.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            stage_root: root.join("stage"),
            output_root: root.join("output"),
            cache_root: root.join("repo"),
            shell: "bash".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_beat_recipe_values() {
        let spec = SettingsSpec {
            stage_root: Some(PathBuf::from("work")),
            shell: Some("sh".into()),
            ..SettingsSpec::default()
        };
        let settings = RunSettings::resolve(
            &spec,
            Path::new("/recipes"),
            SettingsOverrides {
                stage_root: Some(PathBuf::from("/scratch/stage")),
                shell: Some("bash".into()),
                ..SettingsOverrides::default()
            },
        );
        assert_eq!(settings.stage_root, PathBuf::from("/scratch/stage"));
        assert_eq!(settings.shell, "bash");
    }

    #[test]
    fn rooted_at_uses_conventional_names() {
        let settings = RunSettings::rooted_at(Path::new("/tmp/run"));
        assert_eq!(settings.cache_root, PathBuf::from("/tmp/run/repo"));
        assert_eq!(settings.output_root, PathBuf::from("/tmp/run/output"));
    }
}
