//! Error taxonomy for the tree/layer index.
//!
//! Structural and lock violations are typed so the immediate caller (a
//! Context/Workspace, or a transport) can decide how to surface them.
//! `ErrorKind` is the coarse classification used for that translation; the
//! core itself never speaks HTTP.

use crate::layer::LayerId;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the backing key-value store. Always fatal to the current
/// operation and never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
    #[error("failed to decode {what} at key {key:?}: {reason}")]
    Decode {
        what: &'static str,
        key: String,
        reason: String,
    },
    #[error("corrupted log {path} at offset {offset}: {reason}")]
    Corrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("path already exists: {0}")]
    PathExists(String),
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("path {0} has descendants; a non-recursive move would orphan them")]
    NonRecursiveMove(String),
    #[error("path {0} has descendants; a non-recursive remove would orphan them")]
    NonRecursiveRemove(String),
    #[error("layer not found: {0}")]
    LayerNotFound(String),
    #[error("layer {layer} is locked by {holder}")]
    Locked { layer: LayerId, holder: String },
    #[error("layer {layer} is already locked by {holder}")]
    AlreadyLocked { layer: LayerId, holder: String },
    #[error("layer {0} is not locked")]
    NotLocked(LayerId),
    #[error("layer {layer} is held by {holder}, not by the caller")]
    WrongHolder { layer: LayerId, holder: String },
    #[error("layer {0} is protected and cannot be deleted")]
    ProtectedLayer(LayerId),
    #[error("a lock holder identity is required")]
    MissingHolder,
    #[error("context {0} is locked")]
    ContextLocked(String),
    #[error("invalid node data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification of [`Error`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Locked,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PathNotFound(_) | Error::LayerNotFound(_) => ErrorKind::NotFound,
            Error::InvalidPath { .. } | Error::MissingHolder | Error::InvalidData(_) => {
                ErrorKind::InvalidInput
            }
            Error::PathExists(_)
            | Error::NonRecursiveMove(_)
            | Error::NonRecursiveRemove(_)
            | Error::ProtectedLayer(_) => ErrorKind::Conflict,
            Error::Locked { .. }
            | Error::AlreadyLocked { .. }
            | Error::NotLocked(_)
            | Error::WrongHolder { .. }
            | Error::ContextLocked(_) => ErrorKind::Locked,
            Error::Store(_) => ErrorKind::Storage,
        }
    }

    /// Per-target failures are collected; everything else aborts the call.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::PathNotFound("/a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::NonRecursiveRemove("/a".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::NotLocked(LayerId::from("l1")).kind(),
            ErrorKind::Locked
        );
        let io = StoreError::io("/tmp/x", io::Error::new(io::ErrorKind::Other, "boom"));
        let err = Error::from(io);
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidInput).unwrap();
        assert_eq!(json, "\"invalid-input\"");
    }
}
