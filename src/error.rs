//! Error taxonomy for the build engine.
//!
//! Each variant of [`KilnError`] corresponds to one failure class with its own
//! containment policy: configuration errors abort the whole invocation,
//! toolchain and discovery errors abort a single project, task errors are
//! recorded per task, and manifest errors are recovered from.

use std::path::PathBuf;

use thiserror::Error;

use crate::toolchain::ToolchainError;

pub type Result<T, E = KilnError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KilnError {
    /// Malformed or missing descriptor fields, duplicate subprojects.
    #[error("config error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// The declared compiler/standard cannot produce a command line.
    #[error("toolchain error for project '{project}': {source}")]
    Toolchain {
        project: String,
        #[source]
        source: ToolchainError,
    },

    /// A source directory could not be read.
    #[error("cannot read sources of project '{project}' at {path}: {message}")]
    Discovery {
        project: String,
        path: PathBuf,
        message: String,
    },

    /// A compile, link or bootstrap command failed.
    #[error("task '{task}' failed: {message}")]
    TaskExecution { task: String, message: String },

    /// The task workers could not be started.
    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),

    /// Persisted build state is unreadable or corrupt.
    #[error("manifest at {path} is unusable: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl KilnError {
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        KilnError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KilnError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error must stop the invocation before any task runs.
    pub fn is_fatal(&self) -> bool {
        matches!(self, KilnError::Config { .. })
    }
}
