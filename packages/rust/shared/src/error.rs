//! Error types for dbt-docgen.
//!
//! Library crates use [`DocgenError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docgen operations.
#[derive(Debug, thiserror::Error)]
pub enum DocgenError {
    /// The build-metadata artifact does not exist.
    #[error("manifest not found at {path:?} (run `dbt compile` to produce it)")]
    ArtifactNotFound { path: PathBuf },

    /// The build-metadata artifact could not be parsed or lacks required fields.
    #[error("malformed manifest: {message}")]
    ArtifactMalformed { message: String },

    /// The language model answered, but not with three usable sections.
    #[error("invalid generation response: {message}")]
    GenerationInvalid { message: String },

    /// Rate-limit retries ran out.
    #[error("rate limited, gave up after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    /// Transport failure, timeout, or a request the service refused.
    #[error("generation request failed: {0}")]
    GenerationTransport(String),

    /// A documentation block or schema file could not be written.
    #[error("write failed at {path:?}: {message}")]
    Write { path: PathBuf, message: String },

    /// The schema file changed between read and write.
    #[error("schema file {path:?} changed since it was read; update aborted")]
    SchemaConflict { path: PathBuf },

    /// The schema file is not a usable dbt properties document.
    #[error("schema file {path:?}: {message}")]
    SchemaMalformed { path: PathBuf, message: String },

    /// The run deadline passed before this model was admitted.
    #[error("run timeout reached before the model was scheduled")]
    RunTimeout,

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocgenError>;

/// Failure taxonomy reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum FailureKind {
    ArtifactNotFoundError,
    ArtifactMalformedError,
    GenerationInvalidError,
    GenerationExhaustedError,
    GenerationTransportError,
    WriteError,
    SchemaConflictError,
    SchemaMalformedError,
    RunTimeoutError,
    ConfigError,
    IoError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactNotFoundError => "ArtifactNotFoundError",
            Self::ArtifactMalformedError => "ArtifactMalformedError",
            Self::GenerationInvalidError => "GenerationInvalidError",
            Self::GenerationExhaustedError => "GenerationExhaustedError",
            Self::GenerationTransportError => "GenerationTransportError",
            Self::WriteError => "WriteError",
            Self::SchemaConflictError => "SchemaConflictError",
            Self::SchemaMalformedError => "SchemaMalformedError",
            Self::RunTimeoutError => "RunTimeoutError",
            Self::ConfigError => "ConfigError",
            Self::IoError => "IoError",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DocgenError {
    /// Create a malformed-artifact error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::ArtifactMalformed {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-generation error from any displayable message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::GenerationInvalid {
            message: msg.into(),
        }
    }

    /// Create a write error for `path`.
    pub fn write(path: impl Into<PathBuf>, msg: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            message: msg.to_string(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Taxonomy kind for summaries and logs.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ArtifactNotFound { .. } => FailureKind::ArtifactNotFoundError,
            Self::ArtifactMalformed { .. } => FailureKind::ArtifactMalformedError,
            Self::GenerationInvalid { .. } => FailureKind::GenerationInvalidError,
            Self::GenerationExhausted { .. } => FailureKind::GenerationExhaustedError,
            Self::GenerationTransport(_) => FailureKind::GenerationTransportError,
            Self::Write { .. } => FailureKind::WriteError,
            Self::SchemaConflict { .. } => FailureKind::SchemaConflictError,
            Self::SchemaMalformed { .. } => FailureKind::SchemaMalformedError,
            Self::RunTimeout => FailureKind::RunTimeoutError,
            Self::Config { .. } => FailureKind::ConfigError,
            Self::Io { .. } => FailureKind::IoError,
        }
    }

    /// Fatal errors abort the whole run; everything else is isolated per model or file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound { .. } | Self::ArtifactMalformed { .. } | Self::Config { .. }
        )
    }
}
