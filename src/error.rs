//! Error types shared by the orchestration, runner and report layers.

use std::io;
use std::path::{Path, PathBuf};

/// Errors raised anywhere in the benchmark pipeline.
///
/// Which variants are fatal depends on the layer: a runner treats all of them as
/// a failure of its own cell, the aggregator downgrades parse errors to a skipped
/// file, and only [`BenchError::ReportAssembly`] aborts a report update.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Missing keys, non-positive counts or inconsistent suite tables.
    #[error("config validation failed: {message}")]
    ConfigValidation { message: String },

    /// A provider was asked to run a flow it does not implement.
    #[error("unsupported flow for {provider}: {message}")]
    UnsupportedFlow { provider: String, message: String },

    /// Reading or writing a file failed.
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON could not be parsed or serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary field file is malformed or has an unexpected shape.
    #[error("invalid field data: {message}")]
    InvalidField { message: String },

    /// Spawning or waiting on a child process failed, or it exited non-zero.
    #[error("process invocation failed: {message}")]
    ProcessInvocation {
        message: String,
        /// Exit code of the child, when it exited on its own.
        exit_code: Option<i32>,
    },

    /// A results document did not match the expected schema.
    #[error("cannot aggregate {}: {message}", path.display())]
    AggregationParse { path: PathBuf, message: String },

    /// The host document cannot be spliced safely.
    #[error("report assembly failed for {}: {message}", path.display())]
    ReportAssembly { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    pub fn validation(message: impl Into<String>) -> Self {
        BenchError::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        BenchError::ProcessInvocation {
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn field(message: impl Into<String>) -> Self {
        BenchError::InvalidField {
            message: message.into(),
        }
    }
}

/// Attach a path to an `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| BenchError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
