//! Fields that resolve legacy references to migrated entities.

use std::cell::RefCell;
use std::collections::HashMap;

use salvage_core::{
    CacheKey, Entity, FieldKind, Filter, UrlParts, is_empty_value, normalize_path,
};
use salvage_finder::{FindError, FinderRegistry, LookupValue};
use serde_json::{Map, Value};

use crate::error::{ErrorCode, FieldConfigError, FieldError, ValidationError};
use crate::field::{CLEAN_COST_MEDIUM, CleanContext, Field, FieldBase};
use crate::file::{FileFieldBuilder, ImageField};
use crate::strategy::{FieldDefaults, MAPPED_NOT_FOUND, NOT_FOUND, Strategy, StrategyCode, StrategySlot};
use crate::values::extract_value;

fn not_found(value: &Value) -> ValidationError {
    let shown = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ValidationError::new(
        ErrorCode::ObjectNotFound,
        format!("No object could be found matching the value '{}'.", shown),
    )
}

fn id_value(entity: &Entity) -> Value {
    entity.id.map(Value::from).unwrap_or(Value::Null)
}

// ── Placeholders ────────────────────────────────────────────────────────────

/// Creates a stand-in entity for a reference that could not be resolved.
pub trait PlaceholderFactory {
    /// Build and save a new entity for `value`, the raw reference found by
    /// the field named `field`.
    fn create(
        &self,
        field: &str,
        value: &Value,
        ctx: &mut CleanContext<'_>,
    ) -> Result<Entity, FieldError>;

    /// The form of `value` the new entity was created from, cached alongside
    /// the raw value.
    fn created_from(&self, value: &Value) -> Value {
        value.clone()
    }
}

/// Downloads the referenced image and saves it as a new image entity.
pub struct DownloadedImageFactory {
    kind: String,
    image: ImageField,
    title_path: Option<String>,
    alt_path: Option<String>,
}

impl DownloadedImageFactory {
    pub const MAX_DIMENSION: u32 = 4000;

    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            image: ImageField::new("file").shrink_to_fit(Self::MAX_DIMENSION, Self::MAX_DIMENSION),
            title_path: None,
            alt_path: None,
        }
    }

    pub fn file_path_replace(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.image = self.image.file_path_replace(from, to);
        self
    }

    /// Row path holding the new image's title.
    pub fn title_from(mut self, path: impl Into<String>) -> Self {
        self.title_path = Some(path.into());
        self
    }

    /// Row path holding the new image's alt text.
    pub fn alt_from(mut self, path: impl Into<String>) -> Self {
        self.alt_path = Some(path.into());
        self
    }

    fn row_text(row: &Value, path: Option<&str>) -> Option<String> {
        let value = extract_value(row, path?).ok()?;
        if is_empty_value(value) {
            return None;
        }
        Some(match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
    }
}

impl PlaceholderFactory for DownloadedImageFactory {
    fn created_from(&self, value: &Value) -> Value {
        Value::String(self.image.source_url(value))
    }

    fn create(
        &self,
        field: &str,
        value: &Value,
        ctx: &mut CleanContext<'_>,
    ) -> Result<Entity, FieldError> {
        // The image's own strategies apply, not the command's, and it never
        // compares against the row's entity.
        let defaults = FieldDefaults::default();
        let mut inner = CleanContext {
            store: ctx.store,
            finders: &mut *ctx.finders,
            files: ctx.files,
            defaults: &defaults,
            row: ctx.row,
            current: None,
        };
        let file = self.image.clean(value.clone(), &mut inner)?;

        let title = Self::row_text(ctx.row, self.title_path.as_deref()).unwrap_or_else(|| {
            let owner = match ctx.current {
                Some(Entity { id: Some(id), kind, .. }) => format!("{} {}", kind, id),
                Some(entity) => format!("{} (NEW)", entity.kind),
                None => "(NEW)".to_string(),
            };
            format!("Downloaded {} image for {}", field, owner)
        });

        let url = self.image.source_url(value);
        let mut entity = Entity::new(&self.kind).with_title(title);
        entity.set_attr(
            "legacy_path",
            Value::String(normalize_path(&UrlParts::parse(&url).path)),
        );
        if let Some(alt) = Self::row_text(ctx.row, self.alt_path.as_deref()) {
            entity.set_attr("alt", Value::String(alt));
        }
        let mut data = Map::new();
        data.insert("file".into(), file);
        self.image.update_entity(&mut entity, &data, true);

        ctx.store.save(&mut entity)?;
        Ok(entity)
    }
}

// ── ReferenceField ──────────────────────────────────────────────────────────

/// Resolves a raw legacy reference through a named finder, producing the
/// matched entity's id.
pub struct ReferenceField {
    base: FieldBase,
    finder: String,
    on_not_found: StrategySlot,
    factory: Option<Box<dyn PlaceholderFactory>>,
}

impl ReferenceField {
    pub fn new(name: impl Into<String>, finder: impl Into<String>) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_MEDIUM),
            finder: finder.into(),
            on_not_found: StrategySlot::new("on_not_found", NOT_FOUND),
            factory: None,
        }
    }

    pub fn on_not_found(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        self.on_not_found.set(&self.base.name, strategy)?;
        Ok(self)
    }

    /// Factory used by the `AttemptCreate` strategy.
    pub fn placeholder(mut self, factory: impl PlaceholderFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    fn unknown_finder(&self) -> FieldConfigError {
        FieldConfigError::UnknownFinder {
            field: self.base.name.clone(),
            finder: self.finder.clone(),
        }
    }

    fn create(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| FieldConfigError::NoPlaceholderFactory {
                field: self.base.name.clone(),
            })?;
        let entity = factory.create(&self.base.name, &value, ctx)?;
        log::info!(
            "Field '{}': created {} for '{}'",
            self.base.name,
            entity.describe(),
            value
        );

        // Later rows referencing the same value reuse the new entity, even
        // when no lookup option supports it.
        if let Some(finder) = ctx.finders.get_mut(&self.finder) {
            let created_from = factory.created_from(&value);
            for raw in [value, created_from] {
                let lookup = finder
                    .lookup_value(raw.clone())
                    .unwrap_or_else(|_| LookupValue::new(raw));
                finder.add_to_cache(&lookup, Some(&entity));
            }
        }
        Ok(id_value(&entity))
    }
}

impl Field for ReferenceField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn bind(
        &mut self,
        finders: &FinderRegistry,
        defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        if !finders.contains(&self.finder) {
            return Err(self.unknown_finder());
        }
        let strategy = self
            .on_not_found
            .resolve(defaults.on_not_found.as_ref(), Strategy::Raise);
        if strategy.code() == StrategyCode::AttemptCreate && self.factory.is_none() {
            return Err(FieldConfigError::NoPlaceholderFactory {
                field: self.base.name.clone(),
            });
        }
        Ok(())
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        let store = ctx.store;
        let finder = ctx
            .finders
            .get_mut(&self.finder)
            .ok_or_else(|| self.unknown_finder())?;
        match finder.find(store, value.clone()) {
            Ok(entity) => return Ok(id_value(&entity)),
            Err(e @ (FindError::NotFound { .. } | FindError::ValueNotSupported { .. })) => {
                log::debug!("Field '{}': {}", self.base.name, e);
            }
            Err(e) => return Err(e.into()),
        }

        let strategy = self
            .on_not_found
            .resolve(ctx.defaults.on_not_found.as_ref(), Strategy::Raise);
        match strategy {
            Strategy::AttemptCreate => self.create(value, ctx),
            strategy => {
                let error = not_found(&value);
                self.base.recover(strategy, &value, error)
            }
        }
    }
}

// ── MappedReferenceField ────────────────────────────────────────────────────

/// Normalized legacy id: integers and digit strings share a key.
fn legacy_key(value: &Value) -> CacheKey {
    match FieldKind::Integer.coerce(value) {
        Ok(int) => CacheKey::from_value(&int),
        Err(_) => match value {
            Value::String(s) => CacheKey::text(s.trim()),
            other => CacheKey::from_value(other),
        },
    }
}

/// Resolves legacy ids through a map of every entity of the target kinds,
/// loaded from the store on first use and kept for the rest of the run.
pub struct MappedReferenceField {
    base: FieldBase,
    kinds: Vec<String>,
    legacy_id_attr: String,
    on_not_found: StrategySlot,
    map: RefCell<Option<HashMap<CacheKey, i64>>>,
}

impl MappedReferenceField {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        legacy_id_attr: impl Into<String>,
    ) -> Self {
        Self {
            base: FieldBase::new(name, true, CLEAN_COST_MEDIUM),
            kinds: vec![kind.into()],
            legacy_id_attr: legacy_id_attr.into(),
            on_not_found: StrategySlot::new("on_not_found", MAPPED_NOT_FOUND),
            map: RefCell::new(None),
        }
    }

    /// Also map entities of another kind.
    pub fn also_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    pub fn on_not_found(mut self, strategy: Strategy) -> Result<Self, FieldConfigError> {
        self.on_not_found.set(&self.base.name, strategy)?;
        Ok(self)
    }

    fn lookup(&self, ctx: &CleanContext<'_>, value: &Value) -> Result<Option<i64>, FieldError> {
        let mut map = self.map.borrow_mut();
        if map.is_none() {
            let entities = ctx.store.query(&Filter::kinds(self.kinds.iter().cloned()))?;
            let loaded: HashMap<CacheKey, i64> = entities
                .iter()
                .filter_map(|e| {
                    let legacy_id = e.attr(&self.legacy_id_attr).filter(|v| !is_empty_value(v))?;
                    Some((legacy_key(&legacy_id), e.id?))
                })
                .collect();
            log::debug!(
                "Field '{}': mapped {} legacy ids of {}",
                self.base.name,
                loaded.len(),
                self.kinds.join(", ")
            );
            *map = Some(loaded);
        }
        Ok(map
            .as_ref()
            .and_then(|m| m.get(&legacy_key(value)).copied()))
    }
}

impl Field for MappedReferenceField {
    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    /// A new run reloads the map.
    fn bind(
        &mut self,
        _finders: &FinderRegistry,
        _defaults: &FieldDefaults,
    ) -> Result<(), FieldConfigError> {
        *self.map.get_mut() = None;
        Ok(())
    }

    fn clean(&self, value: Value, ctx: &mut CleanContext<'_>) -> Result<Value, FieldError> {
        if let Some(id) = self.lookup(ctx, &value)? {
            return Ok(Value::from(id));
        }
        let strategy = self
            .on_not_found
            .resolve(ctx.defaults.on_not_found.as_ref(), Strategy::Raise);
        let error = not_found(&value);
        self.base.recover(strategy, &value, error)
    }
}
