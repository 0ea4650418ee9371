//! Crate-wide error kinds.
//!
//! Classification matters more than message text: the HTTP boundary (not
//! specified here) picks a status code by matching on the variant, so every
//! fallible public operation in `store`/`facade`/`search` returns
//! [`MemoryError`] rather than a generic `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("already exists")]
    AlreadyExists,

    #[error("session has ended")]
    SessionEnded,

    #[error("failed to acquire lock for {0}")]
    LockAcquisitionFailed(String),

    #[error("storage fault: {message}")]
    StorageFault {
        message: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("upstream model fault: {0}")]
    UpstreamModelFault(String),
}

impl MemoryError {
    pub fn storage(message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::StorageFault {
            message: message.into(),
            cause: cause.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// True for messages the HTTP boundary should map to 400 (in addition to
    /// the BadRequest variant itself) per spec: "is deleted" substrings.
    pub fn is_deleted_message(message: &str) -> bool {
        message.contains("is deleted")
    }
}

impl From<diesel::result::Error> for MemoryError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => MemoryError::NotFound,
            other => MemoryError::storage("diesel query failed", other),
        }
    }
}

impl From<diesel::r2d2::PoolError> for MemoryError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        MemoryError::storage("failed to check out database connection", e)
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
