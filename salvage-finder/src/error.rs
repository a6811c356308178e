use salvage_core::StoreError;
use thiserror::Error;

/// Errors returned by [`Finder::find`](crate::Finder::find).
#[derive(Debug, Error)]
pub enum FindError {
    #[error("No lookup option of the {kind} finder supports '{value}'")]
    ValueNotSupported { kind: String, value: String },

    #[error("No {kind} was found matching '{value}'")]
    NotFound { kind: String, value: String },

    #[error("{count} {kind} entities match '{value}'")]
    MultipleMatches {
        kind: String,
        value: String,
        count: usize,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl FindError {
    pub fn not_found(kind: impl Into<String>, value: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            value: value.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Why a lookup option could not possibly match a value.
///
/// These are raised by [`LookupOption::validate`](crate::LookupOption::validate)
/// and only ever used to decide compatibility; they never reach the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupValueError {
    #[error("value type is incompatible: {0}")]
    TypeIncompatible(String),
    #[error("value is outside the domains of interest")]
    DomainInvalid,
    #[error("value does not match any valid pattern")]
    PatternMismatch,
    #[error("value matches an invalid pattern")]
    PatternExcluded,
    #[error("value fails field validation: {0}")]
    SchemaValidationFailed(String),
    #[error("value has no 2-5 character file extension")]
    ExtensionInvalid,
    #[error("value includes a query string")]
    QueryStringPresent,
    #[error("value includes a fragment")]
    FragmentPresent,
    #[error("value is not a routable path")]
    InvalidRoutePath,
    #[error("value is numeric")]
    NumericValue,
}

/// Setup mistakes detected while binding lookup options to a finder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown entity kind '{0}'")]
    UnknownKind(String),

    #[error("Entity kind '{kind}' has no field '{field}'")]
    UnknownField { kind: String, field: String },

    #[error("Field '{field}' has conflicting types across subtypes of '{kind}': {types}")]
    AmbiguousFieldType {
        kind: String,
        field: String,
        types: String,
    },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}
