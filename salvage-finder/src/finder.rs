//! The finder and its per-run registry.

use std::collections::HashMap;

use salvage_core::{CacheKey, Entity, EntityStore, Filter, LegacyHosts, Schema};
use serde_json::Value;

use crate::error::{ConfigError, FindError};
use crate::option::{BindContext, LookupOption};
use crate::options::FieldOption;
use crate::value::LookupValue;

/// Resolves raw legacy values to entities of one target kind.
///
/// The result cache lives as long as the finder and grows monotonically
/// until [`clear_cache`](Self::clear_cache) is called. A cached `None`
/// records a lookup that failed.
pub struct Finder {
    target_kind: String,
    base: Filter,
    options: Vec<Box<dyn LookupOption>>,
    cache: HashMap<CacheKey, Option<Entity>>,
    cache_lookup_failures: bool,
}

impl Finder {
    /// Bind `options` to `target_kind`. Configuration problems surface here,
    /// never during lookups.
    pub fn new(
        schema: &Schema,
        hosts: &LegacyHosts,
        target_kind: &str,
        mut options: Vec<Box<dyn LookupOption>>,
    ) -> Result<Self, ConfigError> {
        if !schema.contains(target_kind) {
            return Err(ConfigError::UnknownKind(target_kind.to_string()));
        }
        let ctx = BindContext {
            schema,
            hosts,
            target_kind,
        };
        for option in &mut options {
            option.bind(&ctx)?;
        }
        Ok(Self {
            target_kind: target_kind.to_string(),
            base: Filter::KindIn(ctx.target_kinds()),
            options,
            cache: HashMap::new(),
            cache_lookup_failures: true,
        })
    }

    /// Whether failed lookups are cached. On by default, which assumes no
    /// matching entities are created while the finder is in use.
    pub fn cache_lookup_failures(mut self, enabled: bool) -> Self {
        self.cache_lookup_failures = enabled;
        self
    }

    pub fn target_kind(&self) -> &str {
        &self.target_kind
    }

    pub fn options(&self) -> &[Box<dyn LookupOption>] {
        &self.options
    }

    /// Wrap `raw` and check it against every option, failing with
    /// `ValueNotSupported` when none could match. Use this to rule a value
    /// out before paying for a lookup.
    pub fn lookup_value(&self, raw: impl Into<Value>) -> Result<LookupValue, FindError> {
        let mut value = LookupValue::new(raw);
        if !value.check_compatibility(&self.options) {
            return Err(FindError::ValueNotSupported {
                kind: self.target_kind.clone(),
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    /// Find the single entity matching `raw`.
    ///
    /// Values no option supports can still be answered by entities cached
    /// under them with [`add_to_cache`](Self::add_to_cache).
    pub fn find(
        &mut self,
        store: &dyn EntityStore,
        raw: impl Into<Value>,
    ) -> Result<Entity, FindError> {
        let mut value = LookupValue::new(raw);
        if !value.check_compatibility(&self.options) {
            if let Some(Some(entity)) = self.get_from_cache(&value) {
                return Ok(entity);
            }
            return Err(FindError::ValueNotSupported {
                kind: self.target_kind.clone(),
                value: value.to_string(),
            });
        }
        self.find_value(store, &value)
    }

    /// Find the entity matching a value returned by
    /// [`lookup_value`](Self::lookup_value).
    pub fn find_value(
        &mut self,
        store: &dyn EntityStore,
        value: &LookupValue,
    ) -> Result<Entity, FindError> {
        if let Some(cached) = self.get_from_cache(value) {
            return cached.ok_or_else(|| FindError::not_found(self.target_kind.clone(), value));
        }

        match self.get_single_match(store, value) {
            Ok(entity) => {
                self.add_to_cache(value, Some(&entity));
                Ok(entity)
            }
            Err(e) if e.is_not_found() => {
                if self.cache_lookup_failures {
                    self.add_to_cache(value, None);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn get_single_match(
        &self,
        store: &dyn EntityStore,
        value: &LookupValue,
    ) -> Result<Entity, FindError> {
        for &i in value.compatible_options() {
            let Some(option) = self.options.get(i) else {
                continue;
            };
            match option.get_match(value, store, &self.base) {
                Ok(entity) => {
                    log::debug!(
                        "{} finder: '{}' matched {} via {}",
                        self.target_kind,
                        value,
                        entity.describe(),
                        option.name()
                    );
                    return Ok(entity);
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(FindError::not_found(self.target_kind.clone(), value))
    }

    /// The cached result for any of the value's keys: `Some(None)` for a
    /// cached failure, `None` when nothing is cached.
    pub fn get_from_cache(&self, value: &LookupValue) -> Option<Option<Entity>> {
        value
            .cache_keys()
            .iter()
            .find_map(|key| self.cache.get(key).cloned())
    }

    /// Cache `result` under all of the value's keys and, for a found entity,
    /// every key the options derive from it.
    pub fn add_to_cache(&mut self, value: &LookupValue, result: Option<&Entity>) {
        let mut keys: Vec<CacheKey> = value.cache_keys().iter().cloned().collect();
        if let Some(entity) = result {
            for option in self.options.iter().filter(|o| o.is_enabled()) {
                keys.extend(option.extra_cache_keys_from_result(entity));
            }
        }
        for key in keys {
            self.cache.insert(key, result.cloned());
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Finds user accounts by legacy id, where the kind records one, or by
/// `username_field`.
pub fn user_finder(
    schema: &Schema,
    hosts: &LegacyHosts,
    kind: &str,
    username_field: &str,
) -> Result<Finder, ConfigError> {
    Finder::new(
        schema,
        hosts,
        kind,
        vec![
            Box::new(FieldOption::legacy_id()),
            Box::new(FieldOption::new(username_field)),
        ],
    )
}

/// Named finders shared by the fields of one run.
#[derive(Default)]
pub struct FinderRegistry {
    finders: HashMap<String, Finder>,
}

impl FinderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, finder: Finder) {
        self.finders.insert(name.into(), finder);
    }

    pub fn with(mut self, name: impl Into<String>, finder: Finder) -> Self {
        self.register(name, finder);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Finder> {
        self.finders.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Finder> {
        self.finders.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.finders.contains_key(name)
    }

    pub fn clear_caches(&mut self) {
        for finder in self.finders.values_mut() {
            finder.clear_cache();
        }
    }
}
