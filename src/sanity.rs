use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, StageResult};
use crate::pipeline::ExecutionLog;

/// Where a check or metric reads its text from. Anything other than
/// `stdout`/`stderr` is a file path relative to the stage working directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogSource {
    #[default]
    Stdout,
    Stderr,
    File(String),
}

impl From<String> for LogSource {
    fn from(value: String) -> Self {
        match value.trim() {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            other => Self::File(other.to_string()),
        }
    }
}

impl From<LogSource> for String {
    fn from(value: LogSource) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
            Self::File(path) => f.write_str(path),
        }
    }
}

impl LogSource {
    pub fn read(&self, stage: &str, workdir: &Path, log: &ExecutionLog) -> StageResult<String> {
        match self {
            Self::Stdout => Ok(log.stdout.clone()),
            Self::Stderr => Ok(log.stderr.clone()),
            Self::File(relative) => {
                let path = workdir.join(relative);
                if !path.is_file() {
                    return Err(PipelineError::ArtifactMissing {
                        stage: stage.to_string(),
                        path,
                    });
                }
                fs::read_to_string(&path)
                    .map_err(|err| PipelineError::io(format!("reading {}", path.display()), err))
            }
        }
    }
}

/// Number of matches a `pattern_count` check expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedCount {
    Exact(usize),
    HostsFile { hosts_file: String },
}

impl ExpectedCount {
    pub fn resolve(&self, stage: &str, workdir: &Path) -> StageResult<usize> {
        match self {
            Self::Exact(count) => Ok(*count),
            Self::HostsFile { hosts_file } => {
                let path = workdir.join(hosts_file);
                if !path.is_file() {
                    return Err(PipelineError::ArtifactMissing {
                        stage: stage.to_string(),
                        path,
                    });
                }
                count_hosts(&path)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum SanityCheck {
    FilesExist {
        files: Vec<String>,
    },
    PatternFound {
        pattern: String,
        #[serde(default)]
        source: LogSource,
    },
    PatternCount {
        pattern: String,
        #[serde(default)]
        source: LogSource,
        expected: ExpectedCount,
    },
}

impl SanityCheck {
    pub fn compile(&self) -> StageResult<SanityGate> {
        Ok(match self {
            Self::FilesExist { files } => SanityGate::FilesExist(files.clone()),
            Self::PatternFound { pattern, source } => SanityGate::PatternFound {
                pattern: compile_pattern(pattern)?,
                source: source.clone(),
            },
            Self::PatternCount {
                pattern,
                source,
                expected,
            } => SanityGate::PatternCount {
                pattern: compile_pattern(pattern)?,
                source: source.clone(),
                expected: expected.clone(),
            },
        })
    }
}

/// A sanity check with its pattern compiled, ready to be evaluated against
/// a finished stage.
#[derive(Debug, Clone)]
pub enum SanityGate {
    FilesExist(Vec<String>),
    PatternFound {
        pattern: Regex,
        source: LogSource,
    },
    PatternCount {
        pattern: Regex,
        source: LogSource,
        expected: ExpectedCount,
    },
}

impl SanityGate {
    pub fn evaluate(&self, stage: &str, workdir: &Path, log: &ExecutionLog) -> StageResult<()> {
        match self {
            Self::FilesExist(files) => {
                for file in files {
                    let path = workdir.join(file);
                    if !path.exists() {
                        return Err(PipelineError::ArtifactMissing {
                            stage: stage.to_string(),
                            path,
                        });
                    }
                }
                Ok(())
            }
            Self::PatternFound { pattern, source } => {
                let text = source.read(stage, workdir, log)?;
                if pattern.is_match(&text) {
                    Ok(())
                } else {
                    Err(PipelineError::PatternNotFound {
                        stage: stage.to_string(),
                        pattern: pattern.as_str().to_string(),
                    })
                }
            }
            Self::PatternCount {
                pattern,
                source,
                expected,
            } => {
                let text = source.read(stage, workdir, log)?;
                let expected = expected.resolve(stage, workdir)?;
                check_sanity(stage, &text, pattern, expected)
            }
        }
    }
}

pub fn compile_pattern(pattern: &str) -> StageResult<Regex> {
    Regex::new(pattern).map_err(|source| PipelineError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Non-overlapping matches of `pattern` anywhere in `text`.
pub fn count_matches(text: &str, pattern: &Regex) -> usize {
    pattern.find_iter(text).count()
}

/// Line count of a host list. Every line counts, blank ones included.
pub fn count_hosts(path: &Path) -> StageResult<usize> {
    let content = fs::read_to_string(path)
        .map_err(|err| PipelineError::io(format!("reading {}", path.display()), err))?;
    Ok(content.lines().count())
}

pub fn check_sanity(
    stage: &str,
    raw_log_text: &str,
    expected_pattern: &Regex,
    expected_count: usize,
) -> StageResult<()> {
    let found = count_matches(raw_log_text, expected_pattern);
    debug!(
        stage,
        pattern = expected_pattern.as_str(),
        expected = expected_count,
        found,
        "Sanity count evaluated"
    );
    if found == expected_count {
        Ok(())
    } else {
        Err(PipelineError::SanityMismatch {
            stage: stage.to_string(),
            pattern: expected_pattern.as_str().to_string(),
            expected: expected_count,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_source_parses_streams_and_files() {
        assert_eq!(LogSource::from("stdout".to_string()), LogSource::Stdout);
        assert_eq!(LogSource::from("stderr".to_string()), LogSource::Stderr);
        assert_eq!(
            LogSource::from("stream-test-results.log".to_string()),
            LogSource::File("stream-test-results.log".into())
        );
    }

    #[test]
    fn count_matches_is_non_overlapping() {
        let pattern = Regex::new(r"stream: (\S+)").unwrap();
        let log = "system: a stream: 1.0\nsystem: b stream: 2.0\nnoise\n";
        assert_eq!(count_matches(log, &pattern), 2);
    }

    #[test]
    fn sanity_mismatch_reports_counts() {
        let pattern = Regex::new(r"stream: (\S+)").unwrap();
        let err = check_sanity("run", "system: a stream: 1.0\n", &pattern, 2).unwrap_err();
        match err {
            PipelineError::SanityMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expected_count_deserializes_both_shapes() {
        let exact: ExpectedCount = serde_yaml::from_str("3").unwrap();
        assert_eq!(exact, ExpectedCount::Exact(3));
        let hosts: ExpectedCount = serde_yaml::from_str("hosts_file: hosts.txt").unwrap();
        assert_eq!(
            hosts,
            ExpectedCount::HostsFile {
                hosts_file: "hosts.txt".into()
            }
        );
    }
}
