//! The lookup option contract.

use regex::{Regex, RegexBuilder};
use salvage_core::{CacheKey, Entity, EntityStore, Filter, LegacyHosts, Schema};

use crate::error::{ConfigError, FindError, LookupValueError};
use crate::value::LookupValue;

/// Everything an option may consult while binding to a finder.
#[derive(Debug, Clone, Copy)]
pub struct BindContext<'a> {
    pub schema: &'a Schema,
    pub hosts: &'a LegacyHosts,
    pub target_kind: &'a str,
}

impl BindContext<'_> {
    /// The target kind and all of its subtypes.
    pub fn target_kinds(&self) -> Vec<String> {
        self.schema.descendants(self.target_kind)
    }
}

/// One strategy a [`Finder`](crate::Finder) can use to match a raw value.
///
/// Options are bound to exactly one finder. `is_enabled`, `validate` and
/// `is_compatible` must not touch the store and must give the same answer
/// every time they are asked.
pub trait LookupOption {
    /// Short label for log lines.
    fn name(&self) -> String;

    /// Resolve configuration against the target schema. Called once, when
    /// the owning finder is built.
    fn bind(&mut self, ctx: &BindContext<'_>) -> Result<(), ConfigError>;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Fail if `value` could not possibly match.
    fn validate(&self, value: &LookupValue) -> Result<(), LookupValueError>;

    fn is_compatible(&self, value: &LookupValue) -> bool {
        self.is_enabled() && !value.is_empty() && self.validate(value).is_ok()
    }

    /// The single entity matching `value` amongst those matching `base`.
    fn get_match(
        &self,
        value: &LookupValue,
        store: &dyn EntityStore,
        base: &Filter,
    ) -> Result<Entity, FindError>;

    /// Further keys `value` can be cached under, beyond its raw form.
    fn extra_cache_keys(&self, _value: &LookupValue) -> Vec<CacheKey> {
        Vec::new()
    }

    /// Keys under which a found entity can be cached for later lookups.
    fn extra_cache_keys_from_result(&self, _entity: &Entity) -> Vec<CacheKey> {
        Vec::new()
    }
}

// ── Patterns ────────────────────────────────────────────────────────────────

/// Valid/invalid pattern lists shared by all option kinds.
///
/// A pattern matches when it matches at the start of the subject (the raw
/// value, or the URL path for path-based options). With valid patterns
/// configured, a value must match at least one; matching any invalid
/// pattern excludes it.
#[derive(Debug, Clone)]
pub struct Patterns {
    pub case_sensitive: bool,
    pub(crate) valid: Vec<String>,
    pub(crate) invalid: Vec<String>,
    pub(crate) compiled_valid: Vec<Regex>,
    pub(crate) compiled_invalid: Vec<Regex>,
}

impl Default for Patterns {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            valid: Vec::new(),
            invalid: Vec::new(),
            compiled_valid: Vec::new(),
            compiled_invalid: Vec::new(),
        }
    }
}

impl Patterns {
    pub fn add_valid(&mut self, pattern: impl Into<String>) {
        self.valid.push(pattern.into());
    }

    pub fn add_invalid(&mut self, pattern: impl Into<String>) {
        self.invalid.push(pattern.into());
    }

    /// Compile the configured patterns with the current case sensitivity.
    pub fn compile(&mut self) -> Result<(), ConfigError> {
        self.compiled_valid = compile_all(&self.valid, self.case_sensitive)?;
        self.compiled_invalid = compile_all(&self.invalid, self.case_sensitive)?;
        Ok(())
    }

    pub fn check(&self, subject: &str) -> Result<(), LookupValueError> {
        if !self.compiled_valid.is_empty()
            && !self.compiled_valid.iter().any(|re| matches_at_start(re, subject))
        {
            return Err(LookupValueError::PatternMismatch);
        }
        if self.compiled_invalid.iter().any(|re| matches_at_start(re, subject)) {
            return Err(LookupValueError::PatternExcluded);
        }
        Ok(())
    }
}

fn compile_all(patterns: &[String], case_sensitive: bool) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

fn matches_at_start(re: &Regex, subject: &str) -> bool {
    re.find(subject).is_some_and(|m| m.start() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(valid: &[&str], invalid: &[&str], case_sensitive: bool) -> Patterns {
        let mut p = Patterns {
            case_sensitive,
            ..Default::default()
        };
        for v in valid {
            p.add_valid(*v);
        }
        for i in invalid {
            p.add_invalid(*i);
        }
        p.compile().unwrap();
        p
    }

    #[test]
    fn patterns_match_from_the_start() {
        let p = patterns(&["news/"], &[], true);
        assert!(p.check("news/item").is_ok());
        assert_eq!(p.check("/old/news/item"), Err(LookupValueError::PatternMismatch));
    }

    #[test]
    fn invalid_patterns_exclude() {
        let p = patterns(&[], &[r"/admin"], true);
        assert_eq!(p.check("/admin/x"), Err(LookupValueError::PatternExcluded));
        assert!(p.check("/about").is_ok());
    }

    #[test]
    fn case_insensitive_patterns() {
        let p = patterns(&["news"], &[], false);
        assert!(p.check("NEWS/x").is_ok());
        let p = patterns(&["news"], &[], true);
        assert!(p.check("NEWS/x").is_err());
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let mut p = Patterns::default();
        p.add_valid("(");
        assert!(matches!(p.compile(), Err(ConfigError::InvalidPattern { .. })));
    }
}
