//! Cache keys shared by finders and import bookkeeping.

use std::fmt;

use serde_json::Value;

/// A hashable representation of a raw or derived lookup value.
///
/// Distinct raw values can share a key once coerced: `"6"` and `6` are
/// different raw keys, but both produce `CacheKey::Int(6)` after integer
/// coercion, which is what lets one resolved lookup serve the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Floats are keyed by their bit pattern.
    Float(u64),
    Text(String),
    /// Arrays and objects, keyed by their compact JSON rendering.
    Json(String),
}

impl CacheKey {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default().to_bits()),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.to_string()),
        }
    }

    /// The lowercased variant of a text key, used by case-insensitive lookups.
    pub fn folded(&self) -> Option<Self> {
        match self {
            Self::Text(s) => Some(Self::Text(s.to_lowercase())),
            _ => None,
        }
    }
}

impl From<&Value> for CacheKey {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for CacheKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Text(s) => write!(f, "{}", s),
            Self::Json(s) => write!(f, "{}", s),
        }
    }
}
