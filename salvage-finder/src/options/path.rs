//! Matching on the path an entity had on the legacy site.

use salvage_core::{CacheKey, Entity, EntityStore, Filter, LegacyHosts, normalize_path};

use crate::error::{ConfigError, FindError, LookupValueError};
use crate::option::{BindContext, LookupOption, Patterns};
use crate::value::LookupValue;

/// Cache key tying a path to the host and port it was requested on.
pub(crate) fn host_key(value: &LookupValue, port: Option<u16>) -> CacheKey {
    let url = value.url();
    CacheKey::text(format!(
        "{}:{}:{}",
        url.host.as_deref().unwrap_or("-"),
        port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        value.normalized_path()
    ))
}

/// Keys shared by every option that matches on a URL's host and path.
pub(crate) fn domain_keys(value: &LookupValue) -> Vec<CacheKey> {
    let url = value.url();
    let mut keys = vec![host_key(value, url.port)];
    if url.port.is_some() {
        keys.push(host_key(value, None));
    }
    keys
}

/// Matches the stored `legacy_path` attribute against the value's
/// normalized path. Values pointing at external hosts are ignored.
#[derive(Debug, Clone)]
pub struct LegacyPathOption {
    field: String,
    patterns: Patterns,
    patterns_match_path_only: bool,
    hosts: LegacyHosts,
    scopes: Vec<(Vec<String>, String)>,
    kind_label: String,
}

impl Default for LegacyPathOption {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyPathOption {
    pub fn new() -> Self {
        Self {
            field: "legacy_path".to_string(),
            patterns: Patterns::default(),
            patterns_match_path_only: true,
            hosts: LegacyHosts::default(),
            scopes: Vec::new(),
            kind_label: String::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.patterns.case_sensitive = case_sensitive;
        self
    }

    /// Apply patterns to the whole raw value instead of its path.
    pub fn patterns_match_raw(mut self) -> Self {
        self.patterns_match_path_only = false;
        self
    }

    pub fn valid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.add_valid(pattern);
        self
    }

    pub fn invalid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.add_invalid(pattern);
        self
    }

    fn path_key(&self, path: &str) -> CacheKey {
        if self.patterns.case_sensitive {
            CacheKey::text(path)
        } else {
            CacheKey::text(path.to_lowercase())
        }
    }
}

impl LookupOption for LegacyPathOption {
    fn name(&self) -> String {
        format!("legacy-path:{}", self.field)
    }

    fn bind(&mut self, ctx: &BindContext<'_>) -> Result<(), ConfigError> {
        if !ctx.schema.contains(ctx.target_kind) {
            return Err(ConfigError::UnknownKind(ctx.target_kind.to_string()));
        }
        self.kind_label = ctx.target_kind.to_string();
        self.hosts = ctx.hosts.clone();
        self.patterns.compile()?;

        self.scopes = if ctx.schema.field(ctx.target_kind, &self.field).is_some() {
            vec![(ctx.target_kinds(), self.field.clone())]
        } else {
            ctx.schema
                .subtypes_declaring(ctx.target_kind, &self.field)
                .into_iter()
                .map(|(kind, d)| (ctx.schema.descendants(&kind), d.name))
                .collect()
        };
        if self.scopes.is_empty() {
            return Err(ConfigError::UnknownField {
                kind: ctx.target_kind.to_string(),
                field: self.field.clone(),
            });
        }
        Ok(())
    }

    fn validate(&self, value: &LookupValue) -> Result<(), LookupValueError> {
        let raw = value
            .as_str()
            .ok_or_else(|| LookupValueError::TypeIncompatible("not a string".into()))?;
        if value.is_numeric() {
            return Err(LookupValueError::NumericValue);
        }
        if self.hosts.is_external(value.url()) {
            return Err(LookupValueError::DomainInvalid);
        }
        if self.patterns_match_path_only {
            self.patterns.check(&value.url().path)
        } else {
            self.patterns.check(raw)
        }
    }

    fn get_match(
        &self,
        value: &LookupValue,
        store: &dyn EntityStore,
        base: &Filter,
    ) -> Result<Entity, FindError> {
        let path = value.normalized_path();
        let branches = self
            .scopes
            .iter()
            .map(|(kinds, field)| {
                let cond = if self.patterns.case_sensitive {
                    Filter::eq(field.clone(), path)
                } else {
                    Filter::ieq(field.clone(), path)
                };
                Filter::and(vec![Filter::KindIn(kinds.clone()), cond])
            })
            .collect();
        let filter = Filter::and(vec![base.clone(), Filter::or(branches)]);

        let mut matches = store.query(&filter)?;
        match matches.len() {
            0 => Err(FindError::not_found(self.kind_label.clone(), value)),
            1 => Ok(matches.remove(0)),
            count => Err(FindError::MultipleMatches {
                kind: self.kind_label.clone(),
                value: value.to_string(),
                count,
            }),
        }
    }

    fn extra_cache_keys(&self, value: &LookupValue) -> Vec<CacheKey> {
        let mut keys = vec![self.path_key(value.normalized_path())];
        keys.extend(domain_keys(value));
        keys
    }

    fn extra_cache_keys_from_result(&self, entity: &Entity) -> Vec<CacheKey> {
        self.scopes
            .iter()
            .filter(|(kinds, _)| kinds.contains(&entity.kind))
            .filter_map(|(_, field)| entity.attr_str(field))
            .map(|path| self.path_key(&normalize_path(&path)))
            .collect()
    }
}
