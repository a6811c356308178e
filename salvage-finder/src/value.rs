//! The normalized wrapper around one raw value being resolved.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;

use salvage_core::{CacheKey, UrlParts, is_empty_value, normalize_path};
use serde_json::Value;

use crate::option::LookupOption;

pub struct LookupValue {
    raw: Value,
    url: OnceCell<UrlParts>,
    normalized_path: OnceCell<String>,
    compatible: Vec<usize>,
    cache_keys: BTreeSet<CacheKey>,
}

impl LookupValue {
    pub fn new(raw: impl Into<Value>) -> Self {
        let raw = raw.into();
        let mut cache_keys = BTreeSet::new();
        cache_keys.insert(CacheKey::from_value(&raw));
        Self {
            raw,
            url: OnceCell::new(),
            normalized_path: OnceCell::new(),
            compatible: Vec::new(),
            cache_keys,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        is_empty_value(&self.raw)
    }

    /// The raw value if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.raw.as_str()
    }

    /// The raw value rendered as text, for pattern matching. Only scalars
    /// have a text form.
    pub fn text(&self) -> Option<String> {
        match &self.raw {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Numbers, and strings made only of digits.
    pub fn is_numeric(&self) -> bool {
        match &self.raw {
            Value::Number(_) => true,
            Value::String(s) => {
                let s = s.trim();
                !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
            }
            _ => false,
        }
    }

    /// The value parsed as a URL. Parsed once, on first use.
    pub fn url(&self) -> &UrlParts {
        self.url
            .get_or_init(|| UrlParts::parse(self.raw.as_str().unwrap_or_default()))
    }

    pub fn normalized_path(&self) -> &str {
        self.normalized_path
            .get_or_init(|| normalize_path(&self.url().path))
    }

    /// Evaluate every option's compatibility with this value, remembering
    /// the compatible ones and collecting their extra cache keys. Returns
    /// `false` when no option is compatible.
    pub fn check_compatibility(&mut self, options: &[Box<dyn LookupOption>]) -> bool {
        let compatible: Vec<usize> = options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.is_compatible(self))
            .map(|(i, _)| i)
            .collect();

        let mut keys = Vec::new();
        for &i in &compatible {
            keys.extend(options[i].extra_cache_keys(self));
        }
        self.cache_keys.extend(keys);
        self.compatible = compatible;
        !self.compatible.is_empty()
    }

    /// Indexes of the options found compatible by the last compatibility check.
    pub fn compatible_options(&self) -> &[usize] {
        &self.compatible
    }

    /// The raw value's key plus every compatible option's extra keys.
    pub fn cache_keys(&self) -> &BTreeSet<CacheKey> {
        &self.cache_keys
    }
}

impl fmt::Debug for LookupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<LookupValue {}>", self.raw)
    }
}

impl fmt::Display for LookupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}
