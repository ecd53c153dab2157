use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RdxError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Format error: {0}")]
    Format(String),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Corpus store error: {0}")]
    Store(String),
    #[error("Corpus store timed out: {0}")]
    StoreTimeout(String),
    #[error("Schema not found: {0}")]
    SchemaNotFound(i32),
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse failure class, used by batch callers to decide whether to carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Io,
    Format,
    Codec,
    Store,
    Schema,
    Cancelled,
    Config,
}

impl RdxError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Format(_) => ErrorKind::Format,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Store(_) | Self::StoreTimeout(_) => ErrorKind::Store,
            Self::SchemaNotFound(_) | Self::InvalidSchema(_) | Self::Serialization(_) => {
                ErrorKind::Schema
            }
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, RdxError>;
