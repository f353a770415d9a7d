use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineState;

/// Errors that gate a stage. Any of these halts the pipeline at the stage
/// that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{stage}': expected artifact '{}' is missing", path.display())]
    ArtifactMissing { stage: String, path: PathBuf },

    #[error(
        "stage '{stage}': sanity mismatch for pattern '{pattern}': expected {expected} match(es), found {found}"
    )]
    SanityMismatch {
        stage: String,
        pattern: String,
        expected: usize,
        found: usize,
    },

    #[error("stage '{stage}': pattern '{pattern}' not found")]
    PatternNotFound { stage: String, pattern: String },

    #[error("invalid pipeline transition {from} -> {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid reference for '{metric}': {reason}")]
    InvalidReference { metric: String, reason: String },

    #[error("stage '{stage}': failed to launch command: {source}")]
    Execution {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage '{stage}': hook '{hook}' failed: {message}")]
    Hook {
        stage: String,
        hook: String,
        message: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable label used in reports and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::SanityMismatch { .. } => "sanity_mismatch",
            Self::PatternNotFound { .. } => "pattern_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidPattern { .. } => "invalid_pattern",
            Self::InvalidReference { .. } => "invalid_reference",
            Self::Execution { .. } => "execution",
            Self::Hook { .. } => "hook",
            Self::Io { .. } => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

pub type StageResult<T> = std::result::Result<T, PipelineError>;
