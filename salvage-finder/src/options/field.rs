//! Field-equality matching, including the polymorphic and legacy-id forms.

use std::fmt;
use std::sync::Arc;

use salvage_core::{CacheKey, Entity, EntityStore, FieldDescriptor, FieldKind, Filter};
use serde_json::Value;

use crate::error::{ConfigError, FindError, LookupValueError};
use crate::option::{BindContext, LookupOption, Patterns};
use crate::value::LookupValue;

/// Custom resolution of several matches down to one.
pub type ResolveFn = Arc<dyn Fn(&LookupValue, Vec<Entity>) -> Result<Entity, FindError>>;

/// What to do when a field lookup matches more than one entity.
///
/// `First` and `Last` follow the store's natural (id) order.
#[derive(Clone, Default)]
pub enum OnMultiple {
    #[default]
    Raise,
    First,
    Last,
    Resolve(ResolveFn),
}

impl fmt::Debug for OnMultiple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raise => write!(f, "Raise"),
            Self::First => write!(f, "First"),
            Self::Last => write!(f, "Last"),
            Self::Resolve(_) => write!(f, "Resolve(..)"),
        }
    }
}

/// Where the matched attribute lives.
#[derive(Debug, Clone, PartialEq)]
enum Source {
    /// A field on the target kind (or inherited by it).
    Field(String),
    /// A field that may only exist on some subtypes of the target kind.
    Polymorphic(String),
    /// Each kind's declared legacy id field, whatever it is called.
    LegacyId,
}

/// A set of kinds searched on one attribute.
#[derive(Debug, Clone)]
struct Scope {
    kinds: Vec<String>,
    field: String,
}

/// Matches entities whose attribute equals the (type-coerced) value.
#[derive(Debug, Clone)]
pub struct FieldOption {
    source: Source,
    patterns: Patterns,
    on_multiple: OnMultiple,
    enabled: bool,
    descriptor: Option<FieldDescriptor>,
    scopes: Vec<Scope>,
    kind_label: String,
}

impl FieldOption {
    /// Match on `field`, which the target kind must declare or inherit.
    pub fn new(field: impl Into<String>) -> Self {
        Self::with_source(Source::Field(field.into()))
    }

    /// Match on `field` across every subtype that exposes it. Binding fails
    /// with `AmbiguousFieldType` when subtypes declare it with different
    /// types.
    pub fn polymorphic(field: impl Into<String>) -> Self {
        Self::with_source(Source::Polymorphic(field.into()))
    }

    /// Match on the legacy id field. Disables itself when neither the
    /// target kind nor any subtype records a legacy id.
    pub fn legacy_id() -> Self {
        Self::with_source(Source::LegacyId)
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            patterns: Patterns::default(),
            on_multiple: OnMultiple::default(),
            enabled: true,
            descriptor: None,
            scopes: Vec::new(),
            kind_label: String::new(),
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.patterns.case_sensitive = case_sensitive;
        self
    }

    pub fn on_multiple(mut self, on_multiple: OnMultiple) -> Self {
        self.on_multiple = on_multiple;
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

    /// The bound field descriptor, once bound.
    pub fn descriptor(&self) -> Option<&FieldDescriptor> {
        self.descriptor.as_ref()
    }

    fn field_kind(&self) -> FieldKind {
        self.descriptor
            .as_ref()
            .map(|d| d.kind)
            .unwrap_or(FieldKind::Text)
    }

    fn is_text(&self) -> bool {
        matches!(self.field_kind(), FieldKind::Text | FieldKind::File)
    }

    fn coerce(&self, value: &LookupValue) -> Result<Value, LookupValueError> {
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or_else(|| LookupValueError::TypeIncompatible("option is not bound".into()))?;
        let coerced = descriptor
            .kind
            .coerce(value.raw())
            .map_err(|e| LookupValueError::TypeIncompatible(e.to_string()))?;
        if let (Some(max), Value::String(s)) = (descriptor.max_length, &coerced)
            && s.chars().count() > max
        {
            return Err(LookupValueError::SchemaValidationFailed(format!(
                "longer than {} characters",
                max
            )));
        }
        Ok(coerced)
    }

    fn scope_filter(&self, coerced: &Value) -> Filter {
        let insensitive = !self.patterns.case_sensitive && self.is_text();
        let branches = self
            .scopes
            .iter()
            .map(|scope| {
                let cond = match (insensitive, coerced.as_str()) {
                    (true, Some(s)) => Filter::ieq(scope.field.clone(), s),
                    _ => Filter::eq(scope.field.clone(), coerced.clone()),
                };
                Filter::and(vec![Filter::KindIn(scope.kinds.clone()), cond])
            })
            .collect();
        Filter::or(branches)
    }

    fn keys_for(&self, value: &Value) -> Vec<CacheKey> {
        let key = CacheKey::from_value(value);
        let mut keys = Vec::new();
        if !self.patterns.case_sensitive
            && let Some(folded) = key.folded()
        {
            keys.push(folded);
        }
        keys.push(key);
        keys
    }

    fn bind_field(&mut self, ctx: &BindContext<'_>, field: &str) -> Result<(), ConfigError> {
        let descriptor = ctx
            .schema
            .field(ctx.target_kind, field)
            .ok_or_else(|| ConfigError::UnknownField {
                kind: ctx.target_kind.to_string(),
                field: field.to_string(),
            })?;
        self.scopes = vec![Scope {
            kinds: ctx.target_kinds(),
            field: field.to_string(),
        }];
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Bind to per-subtype declarations, checking they agree on type.
    fn bind_subtypes(
        &mut self,
        ctx: &BindContext<'_>,
        field: &str,
        declared: Vec<(String, FieldDescriptor)>,
    ) -> Result<(), ConfigError> {
        let first = declared.first().map(|(_, d)| d.kind);
        if declared.iter().any(|(_, d)| Some(d.kind) != first) {
            let types = declared
                .iter()
                .map(|(kind, d)| format!("{}: {:?}", kind, d.kind))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::AmbiguousFieldType {
                kind: ctx.target_kind.to_string(),
                field: field.to_string(),
                types,
            });
        }

        self.scopes = declared
            .iter()
            .map(|(kind, d)| Scope {
                kinds: ctx.schema.descendants(kind),
                field: d.name.clone(),
            })
            .collect();
        self.descriptor = declared.into_iter().next().map(|(_, d)| d);
        Ok(())
    }
}

impl LookupOption for FieldOption {
    fn name(&self) -> String {
        match &self.source {
            Source::Field(f) => format!("field:{}", f),
            Source::Polymorphic(f) => format!("polymorphic-field:{}", f),
            Source::LegacyId => "legacy-id".to_string(),
        }
    }

    fn bind(&mut self, ctx: &BindContext<'_>) -> Result<(), ConfigError> {
        if !ctx.schema.contains(ctx.target_kind) {
            return Err(ConfigError::UnknownKind(ctx.target_kind.to_string()));
        }
        self.kind_label = ctx.target_kind.to_string();
        self.patterns.compile()?;

        match self.source.clone() {
            Source::Field(field) => self.bind_field(ctx, &field),
            Source::Polymorphic(field) => {
                if ctx.schema.field(ctx.target_kind, &field).is_some() {
                    return self.bind_field(ctx, &field);
                }
                let declared = ctx.schema.subtypes_declaring(ctx.target_kind, &field);
                if declared.is_empty() {
                    return Err(ConfigError::UnknownField {
                        kind: ctx.target_kind.to_string(),
                        field,
                    });
                }
                self.bind_subtypes(ctx, &field, declared)
            }
            Source::LegacyId => {
                if let Some(descriptor) = ctx.schema.legacy_id_field(ctx.target_kind) {
                    let field = descriptor.name.clone();
                    return self.bind_field(ctx, &field);
                }
                let declared = ctx.schema.subtypes_with_legacy_id(ctx.target_kind);
                if declared.is_empty() {
                    log::debug!(
                        "No legacy id field on '{}' or its subtypes; disabling lookup",
                        ctx.target_kind
                    );
                    self.enabled = false;
                    return Ok(());
                }
                self.bind_subtypes(ctx, "legacy id", declared)
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn validate(&self, value: &LookupValue) -> Result<(), LookupValueError> {
        let text = value
            .text()
            .ok_or_else(|| LookupValueError::TypeIncompatible("not a scalar".into()))?;
        self.patterns.check(&text)?;
        self.coerce(value).map(|_| ())
    }

    fn get_match(
        &self,
        value: &LookupValue,
        store: &dyn EntityStore,
        base: &Filter,
    ) -> Result<Entity, FindError> {
        let not_found = || FindError::not_found(self.kind_label.clone(), value);
        let coerced = self.coerce(value).map_err(|_| not_found())?;
        let filter = Filter::and(vec![base.clone(), self.scope_filter(&coerced)]);
        let mut matches = store.query(&filter)?;

        match matches.len() {
            0 => Err(not_found()),
            1 => Ok(matches.remove(0)),
            count => match &self.on_multiple {
                OnMultiple::Raise => Err(FindError::MultipleMatches {
                    kind: self.kind_label.clone(),
                    value: value.to_string(),
                    count,
                }),
                OnMultiple::First => Ok(matches.remove(0)),
                OnMultiple::Last => matches.pop().ok_or_else(not_found),
                OnMultiple::Resolve(resolve) => resolve(value, matches),
            },
        }
    }

    fn extra_cache_keys(&self, value: &LookupValue) -> Vec<CacheKey> {
        match self.coerce(value) {
            Ok(coerced) => self.keys_for(&coerced),
            Err(_) => Vec::new(),
        }
    }

    fn extra_cache_keys_from_result(&self, entity: &Entity) -> Vec<CacheKey> {
        if !self.enabled {
            return Vec::new();
        }
        self.scopes
            .iter()
            .filter(|scope| scope.kinds.contains(&entity.kind))
            .filter_map(|scope| entity.attr(&scope.field))
            .flat_map(|v| self.keys_for(&v))
            .collect()
    }
}
