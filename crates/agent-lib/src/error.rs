//! Typed errors raised by the storage and snapshot layers

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the series store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt series file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid entity name {0:?}")]
    InvalidEntity(String),

    #[error("series {0} does not exist")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while building a cluster snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The payload was returned by the API but is not a JSON document
    #[error("malformed {endpoint} payload: {source}")]
    MalformedPayload {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
