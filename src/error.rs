use std::path::PathBuf;

use thiserror::Error;


/// Errors raised while building the contact network or computing statistics.
///
/// Per-particle and per-saddle failures are contained in their own task: the
/// pipelines log them and drop (or blank) the affected row. Only `Pool`
/// failures reach the submitter.
#[derive(Debug, Error)]
pub enum StatsError {
    /// A record references an id missing from a lookup table.
    #[error("{table}: no entry for id {id}")]
    Lookup { table: &'static str, id: i64 },

    /// Centroid or principal axes requested on zero points.
    #[error("{0}: empty point set")]
    EmptyGeometry(&'static str),

    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed input: unknown format, missing named array, bad cell arity.
    #[error("{}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    /// A row does not match the column schema of its table.
    #[error("schema mismatch: {0}")]
    Schema(String),

    /// A worker task crashed before delivering its result.
    #[error("worker task {0} did not deliver a result")]
    Pool(String),

    #[error("configuration: {0}")]
    Config(String),
}

impl StatsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StatsError::MissingFile(path)
        } else {
            StatsError::Io { path, source }
        }
    }

    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        StatsError::Format {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
