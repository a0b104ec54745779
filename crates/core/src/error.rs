//! Error types for the pair preparation pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// A record that could not be turned into a [`Conversation`](crate::Conversation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record: {reason}")]
pub struct MalformedRecord {
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("malformed record at {}:{line}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        /// 1-based line number within `path`.
        line: usize,
        reason: String,
    },

    #[error("no records found in {}", path.display())]
    EmptyInput { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PrepError {
    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, err: MalformedRecord) -> Self {
        PrepError::MalformedRecord {
            path: path.into(),
            line,
            reason: err.reason,
        }
    }
}

pub type Result<T, E = PrepError> = std::result::Result<T, E>;
