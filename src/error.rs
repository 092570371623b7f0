//! Crate-wide error type and its mapping onto the wire's `error_type` tag.

use crate::proto::ErrorType;

pub type Result<T> = std::result::Result<T, MdsError>;

#[derive(Debug, thiserror::Error)]
pub enum MdsError {
    #[error("owner tag mismatch")]
    OwnerTagMismatch,

    #[error("namespace `{0}` no longer exists on the backend")]
    NamespaceGone(String),

    #[error("write rejected: table is in slave role")]
    SlaveRejectedWrite,

    #[error("table is in the wrong role for this operation")]
    WrongRole,

    #[error("storage engine error: {0}")]
    Storage(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transport(#[from] std::io::Error),

    #[error("namespace `{0}` does not exist")]
    NamespaceNotFound(String),

    #[error("namespace `{0}` already exists")]
    NamespaceExists(String),

    #[error("node `{0}` is not running")]
    NodeGone(String),

    #[error("{0}")]
    Generic(String),
}

impl MdsError {
    /// The error tag carried in the wire `Error` response body (spec.md §4.3).
    pub fn wire_error_type(&self) -> ErrorType {
        match self {
            MdsError::OwnerTagMismatch => ErrorType::OwnerTagMismatch,
            MdsError::NamespaceGone(_) => ErrorType::NamespaceGone,
            MdsError::SlaveRejectedWrite => ErrorType::SlaveRejectedWrite,
            _ => ErrorType::Generic,
        }
    }
}

impl From<rocksdb::Error> for MdsError {
    fn from(e: rocksdb::Error) -> Self {
        MdsError::Storage(e.to_string())
    }
}

impl From<anyhow::Error> for MdsError {
    fn from(e: anyhow::Error) -> Self {
        MdsError::Generic(e.to_string())
    }
}
