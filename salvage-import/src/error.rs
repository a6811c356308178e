use salvage_core::StoreError;
use salvage_fields::{FieldConfigError, FieldError, RowErrors};
use salvage_finder::{ConfigError, FindError};
use thiserror::Error;

use crate::reader::{ReaderError, WindowError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid options: {0}")]
    Window(#[from] WindowError),

    #[error(
        "Resume progress could not be found. Try running again without 'resume' \
         to start the import from scratch."
    )]
    NoResumeProgress,

    #[error("Resuming needs a checkpoint store")]
    NoCheckpointStore,

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("No source id found at '{path}'")]
    MissingSourceId { path: String },

    #[error("Row {row} (source id {source_id}) is invalid: {errors}")]
    InvalidRow {
        row: u64,
        source_id: String,
        errors: RowErrors,
    },

    #[error("No finder named '{0}' is registered")]
    UnknownFinder(String),

    #[error("No default parent could be found: {0}")]
    NoDefaultParent(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lookup failed: {0}")]
    Find(#[from] FindError),

    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    #[error("Configuration error: {0}")]
    Config(#[from] FieldConfigError),

    #[error("Finder configuration error: {0}")]
    FinderConfig(#[from] ConfigError),
}

impl ImportError {
    /// Whether a resilient run may log this error and carry on with the
    /// next row. Configuration mistakes, reader failures and backend
    /// failures always end the run.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) | Self::Field(FieldError::Store(e)) => e.is_recoverable(),
            Self::Find(FindError::Store(e)) | Self::Field(FieldError::Find(FindError::Store(e))) => {
                e.is_recoverable()
            }
            Self::Field(FieldError::Config(_))
            | Self::Config(_)
            | Self::FinderConfig(_)
            | Self::UnknownFinder(_)
            | Self::NoDefaultParent(_)
            | Self::Window(_)
            | Self::NoResumeProgress
            | Self::NoCheckpointStore
            | Self::Reader(_) => false,
            _ => true,
        }
    }
}
