//! Field cleaning errors.

use std::fmt;

use salvage_core::StoreError;
use salvage_finder::{ConfigError, FindError};
use thiserror::Error;

use crate::strategy::StrategyCode;

/// Machine-readable reason for a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValueMissing,
    ValueEmpty,
    Invalid,
    Incoercible,
    MaxLengthExceeded,
    ObjectNotFound,
    DownloadError,
    MaxFilesizeExceeded,
    InvalidExtension,
    MaxWidthExceeded,
    MaxHeightExceeded,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValueMissing => "value_missing",
            Self::ValueEmpty => "value_empty",
            Self::Invalid => "invalid",
            Self::Incoercible => "incoercible",
            Self::MaxLengthExceeded => "max_length_exceeded",
            Self::ObjectNotFound => "object_not_found",
            Self::DownloadError => "download_error",
            Self::MaxFilesizeExceeded => "max_filesize_exceeded",
            Self::InvalidExtension => "invalid_extension",
            Self::MaxWidthExceeded => "max_width_exceeded",
            Self::MaxHeightExceeded => "max_height_exceeded",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value was present (or expected) but could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    pub fn incoercible(value: impl fmt::Display, type_name: &str) -> Self {
        Self::new(
            ErrorCode::Incoercible,
            format!("Could not coerce '{}' to type {}.", value, type_name),
        )
    }
}

/// Field set-up mistakes. Raised while building or binding fields, never
/// while cleaning a row.
#[derive(Debug, Error)]
pub enum FieldConfigError {
    #[error("Field '{field}': '{option}' is redundant on a required field")]
    RedundantForRequired { field: String, option: &'static str },

    #[error("Field '{field}': {strategy:?} is not a valid '{option}' strategy")]
    StrategyNotAllowed {
        field: String,
        option: &'static str,
        strategy: StrategyCode,
    },

    #[error("Field '{field}': 'flatten' needs exactly one sub-field, found {count}")]
    FlattenNeedsOneSubField { field: String, count: usize },

    #[error("Field '{field}': no finder named '{finder}' is registered")]
    UnknownFinder { field: String, finder: String },

    #[error("Field '{field}': AttemptCreate needs a placeholder factory")]
    NoPlaceholderFactory { field: String },

    #[error("Field '{field}': no file fetcher/storage configured for this run")]
    NoFileServices { field: String },

    #[error(transparent)]
    Finder(#[from] ConfigError),
}

/// Why a field did not produce a cleaned value.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Leave the target attribute untouched for this row.
    #[error("Field skipped")]
    SkipField,

    /// Abandon the whole row.
    #[error("Row skipped")]
    SkipRow,

    #[error(transparent)]
    Find(#[from] FindError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] FieldConfigError),
}

/// Validation errors collected while cleaning one row, keyed by field name
/// in the order the fields were cleaned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowErrors {
    entries: Vec<(String, Vec<ValidationError>)>,
}

impl RowErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, error: ValidationError) {
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some((_, errors)) => errors.push(error),
            None => self.entries.push((field.to_string(), vec![error])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fields with errors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, field: &str) -> Option<&[ValidationError]> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, errors)| errors.as_slice())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ValidationError])> {
        self.entries
            .iter()
            .map(|(name, errors)| (name.as_str(), errors.as_slice()))
    }
}

impl fmt::Display for RowErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, errors)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            let messages: Vec<String> = errors
                .iter()
                .map(|e| format!("[{}] {}", e.code, e.message))
                .collect();
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_errors_group_by_field_in_order() {
        let mut errors = RowErrors::new();
        errors.push("title", ValidationError::invalid("bad"));
        errors.push("date", ValidationError::incoercible("x", "date"));
        errors.push("title", ValidationError::new(ErrorCode::MaxLengthExceeded, "long"));

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["title", "date"]);
        assert_eq!(errors.get("title").map(|e| e.len()), Some(2));
        assert_eq!(
            errors.to_string(),
            "title: [invalid] bad, [max_length_exceeded] long; date: [incoercible] Could not coerce 'x' to type date."
        );
    }
}
