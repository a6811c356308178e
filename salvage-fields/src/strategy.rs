//! What a field does when its value is missing, empty, invalid or cannot be
//! resolved.
//!
//! A strategy is resolved lazily every time it is needed: an explicit
//! per-field choice wins, then the command-level [`FieldDefaults`], then the
//! field kind's own default. Command defaults a slot does not allow are
//! ignored for that slot.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::FieldError;

/// A custom handler. Receives the offending value (`None` when it was
/// missing) and returns the value to use instead. Returned values are used
/// as-is, without further cleaning.
pub type Handler = Arc<dyn Fn(Option<&Value>) -> Result<Value, FieldError>>;

#[derive(Clone)]
pub enum Strategy {
    Raise,
    UseFallback,
    SkipField,
    SkipRow,
    TrimToFit,
    AttemptCreate,
    ShrinkImage,
    ConvertToWebp,
    Custom(Handler),
}

/// A strategy without its payload, used for allow-lists and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyCode {
    Raise,
    UseFallback,
    SkipField,
    SkipRow,
    TrimToFit,
    AttemptCreate,
    ShrinkImage,
    ConvertToWebp,
    Custom,
}

impl Strategy {
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(Option<&Value>) -> Result<Value, FieldError> + 'static,
    {
        Self::Custom(Arc::new(handler))
    }

    pub fn code(&self) -> StrategyCode {
        match self {
            Self::Raise => StrategyCode::Raise,
            Self::UseFallback => StrategyCode::UseFallback,
            Self::SkipField => StrategyCode::SkipField,
            Self::SkipRow => StrategyCode::SkipRow,
            Self::TrimToFit => StrategyCode::TrimToFit,
            Self::AttemptCreate => StrategyCode::AttemptCreate,
            Self::ShrinkImage => StrategyCode::ShrinkImage,
            Self::ConvertToWebp => StrategyCode::ConvertToWebp,
            Self::Custom(_) => StrategyCode::Custom,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(_) => write!(f, "Custom(..)"),
            other => write!(f, "{:?}", other.code()),
        }
    }
}

// ── Allowed strategies per slot ─────────────────────────────────────────────

use StrategyCode as S;

pub const MISSING_VALUE: &[StrategyCode] =
    &[S::Raise, S::UseFallback, S::SkipField, S::SkipRow, S::Custom];
pub const EMPTY_VALUE: &[StrategyCode] = MISSING_VALUE;
pub const MAX_LENGTH_EXCEEDED: &[StrategyCode] =
    &[S::Raise, S::TrimToFit, S::UseFallback, S::Custom];
pub const NOT_FOUND: &[StrategyCode] = &[
    S::Raise,
    S::SkipField,
    S::SkipRow,
    S::UseFallback,
    S::Custom,
    S::AttemptCreate,
];
pub const MAPPED_NOT_FOUND: &[StrategyCode] =
    &[S::Raise, S::SkipField, S::SkipRow, S::UseFallback, S::Custom];
pub const DOWNLOAD_ERROR: &[StrategyCode] =
    &[S::Raise, S::SkipField, S::SkipRow, S::UseFallback, S::Custom];
pub const FILE_INVALID: &[StrategyCode] = DOWNLOAD_ERROR;
pub const EXTENSION_INVALID: &[StrategyCode] = DOWNLOAD_ERROR;
pub const IMAGE_EXTENSION_INVALID: &[StrategyCode] = &[
    S::Raise,
    S::SkipField,
    S::SkipRow,
    S::UseFallback,
    S::Custom,
    S::ConvertToWebp,
];
pub const MAX_DIMENSIONS_EXCEEDED: &[StrategyCode] = &[S::Raise, S::ShrinkImage];

/// Command-level strategy defaults, consulted for every field that has no
/// explicit choice of its own.
#[derive(Debug, Clone, Default)]
pub struct FieldDefaults {
    pub on_missing_value: Option<Strategy>,
    pub on_empty_value: Option<Strategy>,
    pub on_max_length_exceeded: Option<Strategy>,
    pub on_not_found: Option<Strategy>,
    pub on_download_error: Option<Strategy>,
    pub on_file_invalid: Option<Strategy>,
    pub on_extension_invalid: Option<Strategy>,
}

/// One configurable strategy on a field.
#[derive(Debug, Clone)]
pub struct StrategySlot {
    option: &'static str,
    allowed: &'static [StrategyCode],
    explicit: Option<Strategy>,
}

impl StrategySlot {
    pub const fn new(option: &'static str, allowed: &'static [StrategyCode]) -> Self {
        Self {
            option,
            allowed,
            explicit: None,
        }
    }

    pub fn option(&self) -> &'static str {
        self.option
    }

    pub fn allows(&self, strategy: &Strategy) -> bool {
        self.allowed.contains(&strategy.code())
    }

    pub fn is_set(&self) -> bool {
        self.explicit.is_some()
    }

    /// Set the explicit strategy, rejecting ones this slot does not allow.
    pub fn set(&mut self, field: &str, strategy: Strategy) -> Result<(), crate::FieldConfigError> {
        if !self.allows(&strategy) {
            return Err(crate::FieldConfigError::StrategyNotAllowed {
                field: field.to_string(),
                option: self.option,
                strategy: strategy.code(),
            });
        }
        self.explicit = Some(strategy);
        Ok(())
    }

    /// The strategy in effect right now.
    pub fn resolve(&self, command: Option<&Strategy>, class_default: Strategy) -> Strategy {
        if let Some(explicit) = &self.explicit {
            return explicit.clone();
        }
        match command {
            Some(s) if self.allows(s) => s.clone(),
            _ => class_default,
        }
    }
}
