// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a durable timeline store.
///
/// None of these are fatal: the subject cache logs them and keeps serving
/// from its in-memory copy.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Timeline storage directory unavailable: {path}")]
    StorageUnavailable { path: PathBuf },

    #[error("Permission denied writing timeline record: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Storage quota exceeded writing {path}")]
    QuotaExceeded { path: PathBuf },

    #[error("IO error on timeline record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeline record {key} could not be serialized: {message}")]
    Serialize { key: String, message: String },

    #[error("Timeline record {key} is corrupt: {message}")]
    Corrupt { key: String, message: String },

    #[error("Timeline store rejected {key}: {message}")]
    Rejected { key: String, message: String },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::StorageFull => Self::QuotaExceeded { path },
            _ => Self::Io { path, source },
        }
    }
}

/// A worker message that could not be turned into a session event.
///
/// The session drops the message and keeps streaming.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON from worker: {message}")]
    MalformedJson { message: String },

    #[error("Worker message has neither a step nor a status: {raw}")]
    UnrecognizedShape { raw: String },

    #[error("Worker sent an invalid step value: {value}")]
    InvalidStep { value: String },

    #[error("Unexpected binary frame of {len} bytes")]
    UnexpectedBinary { len: usize },
}

/// Input rejected before any session starts. Nothing is mutated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Not an image: {reason}")]
    NotAnImage { reason: String },

    #[error("Image payload is empty or truncated")]
    EmptyImage,

    #[error("Subject {requested:?} is not the active subject {active:?}")]
    SubjectMismatch {
        requested: Option<String>,
        active: Option<String>,
    },
}
