use rdx_core::RdxError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LcmError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Foreign key violation: {0}")]
    ForeignKey(String),
    #[error("Conflicting record: {0}")]
    Conflict(String),
    #[error("Timed out waiting for store lock during {0}")]
    Timeout(&'static str),
    #[error("Journal error: {0}")]
    Journal(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LcmError>;

impl From<LcmError> for RdxError {
    fn from(err: LcmError) -> Self {
        match err {
            LcmError::Timeout(op) => RdxError::StoreTimeout(op.to_string()),
            other => RdxError::Store(other.to_string()),
        }
    }
}
