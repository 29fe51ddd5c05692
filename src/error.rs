use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("invalid DICOM UID: {0}")]
    InvalidUid(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("remote returned status {status}: {message}")]
    RetrievalStatus { status: u16, message: String },

    #[error("retrieval cancelled")]
    Cancelled,

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("cannot parse {name}: {reason}")]
    Parse { name: String, reason: String },

    #[error("study not found in metadata store: {0}")]
    Lookup(String),

    #[error("no data source registered for capability {0}")]
    MissingDataSource(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl IngestError {
    /// Transport failures, including a cancelled download.
    pub fn is_retrieval(&self) -> bool {
        matches!(
            self,
            IngestError::Retrieval(_) | IngestError::RetrievalStatus { .. } | IngestError::Cancelled
        )
    }

    pub fn parse(name: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::Parse {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
