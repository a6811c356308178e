//! Row sources.
//!
//! A [`Reader`] only knows how to fetch a slice of its rows. Windowing
//! and pagination are shared: the [`Pager`] turns a validated
//! [`ReadWindow`] into a sequence of [`Page`]s and decides when a run of
//! pages is over.

mod csv;
mod entity;
mod json;
mod sql;
mod window;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

pub use self::csv::{CsvReader, sanitize_cell};
pub use self::entity::EntityReader;
pub use self::json::JsonReader;
pub use self::sql::SqlReader;
pub use self::window::{Page, Pager, ReadWindow, WindowError, WindowOptions};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a top-level JSON array in {0}")]
    NotAnArray(String),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(#[from] salvage_core::StoreError),
}

/// A source of raw rows.
pub trait Reader {
    /// Identifies the data read (file path, query, entity kind). Part of
    /// the resume key, so two runs over different data never share
    /// progress.
    fn source(&self) -> String;

    /// Default page size for readers that fetch in pages; `None` for
    /// readers that load everything at once.
    fn default_page_size(&self) -> Option<u64> {
        None
    }

    /// Total number of rows, when the source can tell cheaply.
    fn total_rows(&mut self) -> Result<Option<u64>, ReaderError> {
        Ok(None)
    }

    /// Up to `limit` rows, skipping the first `offset`.
    fn fetch(&mut self, offset: u64, limit: Option<u64>) -> Result<Vec<Value>, ReaderError>;
}

/// Why a paginated read stopped after a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEnd {
    EmptyPage,
    LastPage,
    StopPage,
    StopRow,
    ShortPage { received: u64, expected: u64 },
}

impl PageEnd {
    pub fn message(&self, page: u64) -> String {
        match self {
            Self::EmptyPage => format!("Page {} contained zero rows.", page),
            Self::LastPage => format!("Page {} is the final page.", page),
            Self::StopPage => format!("Page {} is the 'stop-page'.", page),
            Self::StopRow => format!("Page {} contains the 'stop-row'.", page),
            Self::ShortPage { received, expected } => format!(
                "Page {} contained {} rows, which falls short of the usual {}.",
                page, received, expected
            ),
        }
    }
}

impl fmt::Display for PageEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPage => write!(f, "empty page"),
            Self::LastPage => write!(f, "last page"),
            Self::StopPage => write!(f, "stop page"),
            Self::StopRow => write!(f, "stop row"),
            Self::ShortPage { received, expected } => {
                write!(f, "short page ({} of {})", received, expected)
            }
        }
    }
}
