//! Persistent artifact cache for expensive download and build stages.
//!
//! Entries live under `<root>/<platform>/<environment>/<stage>` and are
//! considered valid as soon as the stage's marker file exists there. There
//! is no content hash: a changed source behind the same stage name is never
//! rebuilt until the entry is removed by hand. Two runs for the same
//! platform share the entry without any locking.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{PipelineError, StageResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    /// File (relative to the stage directory) whose presence marks a
    /// usable cache entry, e.g. `xhpl`.
    pub marker: String,
    /// Commands run instead of the stage command when the entry is reused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_hit_cmds: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn entry_dir(&self, platform: &str, environment: &str, stage: &str) -> PathBuf {
        self.root
            .join(path_component(platform))
            .join(path_component(environment))
            .join(path_component(stage))
    }

    pub fn marker_path(
        &self,
        platform: &str,
        environment: &str,
        stage: &str,
        spec: &CacheSpec,
    ) -> PathBuf {
        self.entry_dir(platform, environment, stage)
            .join(&spec.marker)
    }

    /// Copies a cached entry into a fresh stage directory.
    pub fn restore(&self, entry: &Path, workdir: &Path) -> StageResult<u64> {
        let copied = copy_dir_contents(entry, workdir)?;
        debug!(
            entry = %entry.display(),
            workdir = %workdir.display(),
            files = copied,
            "Cache entry restored"
        );
        Ok(copied)
    }

    /// Replaces the cache entry with the contents of a finished stage.
    pub fn publish(&self, workdir: &Path, entry: &Path) -> StageResult<u64> {
        if entry.exists() {
            fs::remove_dir_all(entry).map_err(|err| {
                PipelineError::io(format!("clearing cache entry {}", entry.display()), err)
            })?;
        }
        let copied = copy_dir_contents(workdir, entry)?;
        debug!(
            entry = %entry.display(),
            files = copied,
            "Cache entry published"
        );
        Ok(copied)
    }
}

/// True when a persisted copy of the artifact exists and the stage can be
/// short-circuited.
pub fn skip_if_cached(artifact_path: &Path) -> bool {
    artifact_path.exists()
}

/// Recursively copies everything below `src` into `dst`, returning the
/// number of files copied. `dst` is created when missing.
pub fn copy_dir_contents(src: &Path, dst: &Path) -> StageResult<u64> {
    fs::create_dir_all(dst)
        .map_err(|err| PipelineError::io(format!("creating {}", dst.display()), err))?;

    let mut copied = 0u64;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|err| {
            let context = format!("walking {}", src.display());
            match err.into_io_error() {
                Some(io) => PipelineError::io(context, io),
                None => PipelineError::io(context, std::io::Error::other("filesystem loop")),
            }
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| entry.path());
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| PipelineError::io(format!("creating {}", target.display()), err))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| {
                    PipelineError::io(format!("creating {}", parent.display()), err)
                })?;
            }
            fs::copy(entry.path(), &target).map_err(|err| {
                PipelineError::io(
                    format!(
                        "copying {} to {}",
                        entry.path().display(),
                        target.display()
                    ),
                    err,
                )
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> StageResult<()> {
    let destination = fs::read_link(link)
        .map_err(|err| PipelineError::io(format!("reading link {}", link.display()), err))?;
    if target.symlink_metadata().is_ok() {
        fs::remove_file(target)
            .map_err(|err| PipelineError::io(format!("replacing {}", target.display()), err))?;
    }
    std::os::unix::fs::symlink(&destination, target)
        .map_err(|err| PipelineError::io(format!("linking {}", target.display()), err))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> StageResult<()> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|err| PipelineError::io(format!("copying {}", link.display()), err))
}

/// Makes a platform or stage name safe to use as a single path component.
pub fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "_".to_string()
    } else {
        cleaned
    }
}
